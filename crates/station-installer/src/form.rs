//! Resource selection form: pick a preset or describe a custom resource,
//! choose where it goes, then submit.

use crate::model::{InstallDestination, PresetResource, Resource};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormError {
    #[error("no resource selected")]
    NoResource,
    #[error("a URL is required for custom resources")]
    MissingUrl,
    #[error("a name is required for custom resources")]
    MissingName,
    #[error("no installation destination selected")]
    NoDestination,
    #[error("preset fields are read-only")]
    ReadOnly,
    #[error("select a preset or switch to custom mode first")]
    NotEditing,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum FormMode {
    #[default]
    Browsing,
    Preset(Resource),
    Custom,
}

#[derive(Clone, Debug, Default)]
pub struct SelectionForm {
    mode: FormMode,
    url: String,
    name: String,
    description: String,
    destination: Option<InstallDestination>,
}

impl SelectionForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> &FormMode {
        &self.mode
    }

    pub fn is_editing(&self) -> bool {
        !matches!(self.mode, FormMode::Browsing)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn destination(&self) -> Option<&InstallDestination> {
        self.destination.as_ref()
    }

    /// Snapshots `preset` and auto-selects the destination whose path matches
    /// the preset's suggested one. Without a match the current choice stays.
    pub fn select_preset(&mut self, preset: &PresetResource, destinations: &[InstallDestination]) {
        let resource = preset.to_resource();
        self.url = resource.url.clone().unwrap_or_default();
        self.name = resource.name.clone();
        self.description = resource.description.clone().unwrap_or_default();
        if let Some(matched) = preset
            .destination_path
            .as_deref()
            .and_then(|path| destinations.iter().find(|dest| dest.path == path))
        {
            self.destination = Some(matched.clone());
        }
        self.mode = FormMode::Preset(resource);
    }

    pub fn enter_custom_mode(&mut self) {
        *self = Self {
            mode: FormMode::Custom,
            ..Self::default()
        };
    }

    pub fn set_url(&mut self, url: &str) -> Result<(), FormError> {
        self.ensure_custom()?;
        self.url = url.to_string();
        Ok(())
    }

    pub fn set_name(&mut self, name: &str) -> Result<(), FormError> {
        self.ensure_custom()?;
        self.name = name.to_string();
        Ok(())
    }

    pub fn set_description(&mut self, description: &str) -> Result<(), FormError> {
        self.ensure_custom()?;
        self.description = description.to_string();
        Ok(())
    }

    pub fn select_destination(&mut self, destination: &InstallDestination) -> Result<(), FormError> {
        if !self.is_editing() {
            return Err(FormError::NotEditing);
        }
        self.destination = Some(destination.clone());
        Ok(())
    }

    /// Discards all working state.
    pub fn back(&mut self) {
        *self = Self::default();
    }

    /// Current resource, if the form holds a complete one.
    pub fn resource(&self) -> Result<Resource, FormError> {
        match &self.mode {
            FormMode::Browsing => Err(FormError::NoResource),
            FormMode::Preset(resource) => Ok(resource.clone()),
            FormMode::Custom => {
                if self.url.trim().is_empty() {
                    return Err(FormError::MissingUrl);
                }
                if self.name.trim().is_empty() {
                    return Err(FormError::MissingName);
                }
                Ok(Resource::custom(
                    &self.url,
                    &self.name,
                    Some(self.description.as_str()),
                ))
            }
        }
    }

    /// Validates the form and hands back what to install. The form keeps its
    /// state so a failed submission can be corrected.
    pub fn submit(&self) -> Result<(Resource, InstallDestination), FormError> {
        let resource = self.resource()?;
        let destination = self.destination.clone().ok_or(FormError::NoDestination)?;
        Ok((resource, destination))
    }

    fn ensure_custom(&self) -> Result<(), FormError> {
        match self.mode {
            FormMode::Custom => Ok(()),
            FormMode::Preset(_) => Err(FormError::ReadOnly),
            FormMode::Browsing => Err(FormError::NotEditing),
        }
    }
}
