use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::api::{ApiError, StationApi};
use crate::catalog::{load_catalog, Catalog};
use crate::config::ClientConfig;
use crate::events::{
    EventQueue, InstallerEvent, NotificationLevel, DEFAULT_EVENT_QUEUE_SIZE,
};
use crate::model::{InstallDestination, InstallTask, Resource};
use crate::poller::{start_poller, PollContext, PollerRegistry};
use crate::store::{provisional_task_id, RenameOutcome, TaskStore};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The backend accepted the request; `task_id` is the server id and a
    /// poller is running for it.
    Started { task_id: String },
    /// The request failed; the placeholder task was marked failed.
    Failed { task_id: String, error: String },
}

impl InstallOutcome {
    pub fn task_id(&self) -> &str {
        match self {
            InstallOutcome::Started { task_id } | InstallOutcome::Failed { task_id, .. } => {
                task_id
            }
        }
    }
}

/// Owns the task store, the catalog and the pollers for one backend.
#[derive(Clone)]
pub struct InstallerClient {
    ctx: PollContext,
    catalog: Arc<Mutex<Catalog>>,
    queue: Arc<EventQueue>,
}

impl InstallerClient {
    /// Returns the client and a receiver woken whenever events are queued.
    pub fn new(config: &ClientConfig) -> Result<(Self, mpsc::Receiver<()>), ApiError> {
        let (queue, notify_rx) = EventQueue::new(DEFAULT_EVENT_QUEUE_SIZE);
        let ctx = PollContext {
            api: StationApi::new(config)?,
            store: Arc::new(Mutex::new(TaskStore::new())),
            events: queue.sender(),
            pollers: PollerRegistry::default(),
            interval: config.poll_interval(),
        };
        Ok((
            Self {
                ctx,
                catalog: Arc::new(Mutex::new(Catalog::default())),
                queue,
            },
            notify_rx,
        ))
    }

    pub fn api(&self) -> &StationApi {
        &self.ctx.api
    }

    /// Loads the catalog and seeds the store with tasks the backend already
    /// tracks, resuming polling for those still in flight.
    pub async fn initialize(&self) -> Catalog {
        let load = load_catalog(&self.ctx.api).await;
        {
            let mut catalog = self.catalog.lock().await;
            *catalog = load.catalog.clone();
        }
        if let Ok(tasks) = load.tasks {
            let active = self.ctx.store.lock().await.seed(tasks);
            for task_id in active {
                start_poller(&self.ctx, &task_id);
            }
        }
        load.catalog
    }

    pub async fn catalog(&self) -> Catalog {
        self.catalog.lock().await.clone()
    }

    pub async fn install(
        &self,
        resource: Resource,
        destination: InstallDestination,
    ) -> InstallOutcome {
        let now = Utc::now();
        let provisional = provisional_task_id(now.timestamp_millis());
        let task = InstallTask::pending(
            provisional.clone(),
            resource.clone(),
            destination.clone(),
            now,
        );
        let status = task.status.clone();
        self.ctx.store.lock().await.insert_pending(task);
        self.ctx.events.send(InstallerEvent::TaskUpdated {
            task_id: provisional.clone(),
            status,
            progress: 0.0,
        });
        info!(
            "Installing {} into {} as {provisional}",
            resource.name, destination.path
        );

        match self.ctx.api.install(&resource, &destination).await {
            Ok(accepted) => {
                let task_id = accepted.task_id;
                let renamed = self.ctx.store.lock().await.rename(&provisional, &task_id);
                if renamed == RenameOutcome::NotFound {
                    warn!("Placeholder {provisional} vanished before rename to {task_id}");
                }
                self.ctx.events.send(InstallerEvent::TaskRenamed {
                    from: provisional,
                    to: task_id.clone(),
                });
                start_poller(&self.ctx, &task_id);
                InstallOutcome::Started { task_id }
            }
            Err(err) => {
                warn!("Installation of {} failed to start: {err}", resource.name);
                let error = err.to_string();
                self.ctx.store.lock().await.mark_failed(
                    &provisional,
                    Some(error.clone()),
                    Utc::now(),
                );
                self.ctx.events.send(InstallerEvent::notification(
                    Some(&provisional),
                    NotificationLevel::Error,
                    format!("{} failed to install: {error}", resource.name),
                ));
                InstallOutcome::Failed {
                    task_id: provisional,
                    error,
                }
            }
        }
    }

    /// Asks the backend to cancel `task_id`. Only a confirmed cancel marks
    /// the task cancelled and stops its poller; errors leave it untouched.
    pub async fn cancel(&self, task_id: &str) -> Result<(), ApiError> {
        if let Err(err) = self.ctx.api.cancel(task_id).await {
            warn!("Cancel of {task_id} failed: {err}");
            self.ctx.events.send(InstallerEvent::notification(
                Some(task_id),
                NotificationLevel::Error,
                format!("Failed to cancel {task_id}: {err}"),
            ));
            return Err(err);
        }
        let (changed, name) = {
            let mut store = self.ctx.store.lock().await;
            let changed = store.mark_cancelled(task_id, Utc::now());
            let name = store
                .get(task_id)
                .map(|task| task.resource.name.clone())
                .unwrap_or_else(|| task_id.to_string());
            (changed, name)
        };
        self.ctx.pollers.stop(task_id);
        if changed {
            info!("{task_id} cancelled");
            self.ctx.events.send(InstallerEvent::notification(
                Some(task_id),
                NotificationLevel::Warning,
                format!("{name} installation cancelled"),
            ));
        }
        Ok(())
    }

    /// Restarts polling for a task whose poller stopped while it was still
    /// in flight.
    pub async fn resume_polling(&self, task_id: &str) -> bool {
        let active = self
            .ctx
            .store
            .lock()
            .await
            .get(task_id)
            .is_some_and(|task| !task.is_terminal());
        active && start_poller(&self.ctx, task_id)
    }

    pub async fn tasks(&self) -> Vec<InstallTask> {
        self.ctx.store.lock().await.snapshot()
    }

    pub async fn task(&self, task_id: &str) -> Option<InstallTask> {
        self.ctx.store.lock().await.get(task_id).cloned()
    }

    pub fn is_polling(&self, task_id: &str) -> bool {
        self.ctx.pollers.is_running(task_id)
    }

    pub fn active_pollers(&self) -> usize {
        self.ctx.pollers.running()
    }

    pub fn drain_events(&self) -> Vec<InstallerEvent> {
        self.queue.drain()
    }

    pub fn shutdown(&self) {
        self.ctx.pollers.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PollHealth, TaskStatus};
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> (InstallerClient, mpsc::Receiver<()>) {
        let config = ClientConfig {
            poll_interval_ms: 100,
            ..ClientConfig::for_base_url(server.uri())
        };
        InstallerClient::new(&config).unwrap()
    }

    fn custom_destination() -> InstallDestination {
        InstallDestination {
            id: "d1".into(),
            name: "Custom".into(),
            path: "/custom".into(),
            kind: "custom".into(),
        }
    }

    fn custom_resource() -> Resource {
        Resource::custom("https://example.com/r.zip", "MyResource", None)
    }

    async fn mount_install(server: &MockServer, task_id: &str) {
        Mock::given(method("POST"))
            .and(path("/api/installer/install"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"taskId": task_id, "status": "pending"})),
            )
            .mount(server)
            .await;
    }

    async fn wait_for<F>(client: &InstallerClient, task_id: &str, done: F) -> InstallTask
    where
        F: Fn(&InstallTask) -> bool,
    {
        for _ in 0..100 {
            if let Some(task) = client.task(task_id).await {
                if done(&task) {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("task {task_id} never reached the expected state");
    }

    async fn status_requests(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|req| req.url.path() == "/api/installer/status")
            .count()
    }

    fn notifications(events: &[InstallerEvent]) -> Vec<(NotificationLevel, String)> {
        events
            .iter()
            .filter_map(|event| match event {
                InstallerEvent::Notification { level, message, .. } => {
                    Some((*level, message.clone()))
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn custom_install_renames_to_server_id_and_polls() {
        let server = MockServer::start().await;
        mount_install(&server, "t42").await;
        Mock::given(method("GET"))
            .and(path("/api/installer/status"))
            .and(query_param("taskId", "t42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "downloading",
                "progress": 25.0
            })))
            .mount(&server)
            .await;

        let (client, _rx) = client_for(&server);
        let outcome = client
            .install(custom_resource(), custom_destination())
            .await;
        assert_eq!(
            outcome,
            InstallOutcome::Started {
                task_id: "t42".into()
            }
        );

        let tasks = client.tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "t42");
        assert_eq!(tasks[0].resource.url(), Some("https://example.com/r.zip"));
        assert!(client.is_polling("t42"));

        let task = wait_for(&client, "t42", |task| task.progress >= 25.0).await;
        assert_eq!(task.status, TaskStatus::Downloading);
        assert_eq!(task.poll_health, PollHealth::Polling);
        client.shutdown();
    }

    #[tokio::test]
    async fn poll_to_completion_notifies_once_and_stops() {
        let server = MockServer::start().await;
        mount_install(&server, "t42").await;
        Mock::given(method("GET"))
            .and(path("/api/installer/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "completed",
                "progress": 100,
                "endTime": "2024-01-01T00:00:00Z",
                "resource": {"name": "MyResource"}
            })))
            .mount(&server)
            .await;

        let (client, _rx) = client_for(&server);
        client
            .install(custom_resource(), custom_destination())
            .await;
        let task = wait_for(&client, "t42", |task| task.is_terminal()).await;
        assert_eq!(task.progress, 100.0);
        assert_eq!(
            task.end_time.map(|end| end.to_rfc3339()),
            Some("2024-01-01T00:00:00+00:00".to_string())
        );

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(!client.is_polling("t42"));
        assert_eq!(status_requests(&server).await, 1);

        let notes = notifications(&client.drain_events());
        assert_eq!(
            notes,
            vec![(
                NotificationLevel::Success,
                "MyResource installed successfully".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn failed_install_request_marks_task_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/installer/install"))
            .respond_with(ResponseTemplate::new(400).set_body_string("URL is required"))
            .mount(&server)
            .await;

        let (client, _rx) = client_for(&server);
        let outcome = client
            .install(custom_resource(), custom_destination())
            .await;
        let InstallOutcome::Failed { task_id, error } = outcome else {
            panic!("expected failure");
        };
        assert!(task_id.starts_with("task_"));
        assert!(error.contains("URL is required"));

        let task = client.task(&task_id).await.expect("placeholder kept");
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.is_some_and(|msg| !msg.is_empty()));
        assert!(task.end_time.is_some());
        assert!(!client.is_polling(&task_id));
    }

    #[tokio::test]
    async fn confirmed_cancel_stops_polling() {
        let server = MockServer::start().await;
        mount_install(&server, "t42").await;
        Mock::given(method("GET"))
            .and(path("/api/installer/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "downloading",
                "progress": 10
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/installer/cancel"))
            .and(body_json(serde_json::json!({"taskId": "t42"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"status": "cancelled", "message": "Task cancelled successfully"}),
            ))
            .mount(&server)
            .await;

        let (client, _rx) = client_for(&server);
        client
            .install(custom_resource(), custom_destination())
            .await;
        client.cancel("t42").await.expect("cancel");

        let task = client.task("t42").await.expect("task");
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.end_time.is_some());
        assert!(!client.is_polling("t42"));

        let before = server.received_requests().await.unwrap_or_default().len();
        tokio::time::sleep(Duration::from_millis(350)).await;
        let after = server.received_requests().await.unwrap_or_default().len();
        assert_eq!(before, after);

        let notes = notifications(&client.drain_events());
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].0, NotificationLevel::Warning);
    }

    #[tokio::test]
    async fn cancel_after_polled_cancellation_keeps_server_end_time() {
        let server = MockServer::start().await;
        mount_install(&server, "t42").await;
        Mock::given(method("GET"))
            .and(path("/api/installer/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "cancelled",
                "progress": 30,
                "endTime": "2024-01-01T00:00:00Z"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/installer/cancel"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let (client, _rx) = client_for(&server);
        client
            .install(custom_resource(), custom_destination())
            .await;
        wait_for(&client, "t42", |task| task.is_terminal()).await;
        client.cancel("t42").await.expect("cancel");

        let task = client.task("t42").await.expect("task");
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(
            task.end_time.map(|end| end.to_rfc3339()),
            Some("2024-01-01T00:00:00+00:00".to_string())
        );
        let notes = notifications(&client.drain_events());
        assert_eq!(
            notes,
            vec![(
                NotificationLevel::Warning,
                "MyResource installation cancelled".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn cancel_during_inflight_poll_wins() {
        let server = MockServer::start().await;
        mount_install(&server, "t42").await;
        Mock::given(method("GET"))
            .and(path("/api/installer/status"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"status": "downloading", "progress": 50}))
                    .set_delay(Duration::from_millis(400)),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/installer/cancel"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let (client, _rx) = client_for(&server);
        client
            .install(custom_resource(), custom_destination())
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(status_requests(&server).await, 1);

        client.cancel("t42").await.expect("cancel");
        assert!(!client.is_polling("t42"));
        tokio::time::sleep(Duration::from_millis(600)).await;

        let task = client.task("t42").await.expect("task");
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.progress, 0.0);
        assert_eq!(status_requests(&server).await, 1);
        assert_eq!(notifications(&client.drain_events()).len(), 1);
    }

    #[tokio::test]
    async fn rejected_cancel_leaves_task_untouched() {
        let server = MockServer::start().await;
        mount_install(&server, "t42").await;
        Mock::given(method("GET"))
            .and(path("/api/installer/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "installing",
                "progress": 60
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/installer/cancel"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (client, _rx) = client_for(&server);
        client
            .install(custom_resource(), custom_destination())
            .await;
        assert!(client.cancel("t42").await.is_err());

        let task = client.task("t42").await.expect("task");
        assert!(!task.is_terminal());
        assert!(task.end_time.is_none());
        assert!(client.is_polling("t42"));
        let notes = notifications(&client.drain_events());
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].0, NotificationLevel::Error);
        client.shutdown();
    }

    #[tokio::test]
    async fn broken_poll_stalls_task() {
        let server = MockServer::start().await;
        mount_install(&server, "t42").await;
        Mock::given(method("GET"))
            .and(path("/api/installer/status"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Task not found"))
            .mount(&server)
            .await;

        let (client, _rx) = client_for(&server);
        client
            .install(custom_resource(), custom_destination())
            .await;
        let task = wait_for(&client, "t42", |task| task.is_stalled()).await;
        assert_eq!(task.status, TaskStatus::Pending);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!client.is_polling("t42"));
        assert!(client.resume_polling("t42").await);
        client.shutdown();
    }

    #[tokio::test]
    async fn initialize_seeds_tasks_and_resumes_polling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/preset-resources"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"resources": []})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/installation-destinations"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/installer/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "t1", "status": "downloading", "progress": 5, "startTime": "2024-01-01T00:00:00Z"},
                {"id": "t2", "status": "completed", "progress": 100,
                 "startTime": "2024-01-01T00:00:00Z", "endTime": "2024-01-01T00:05:00Z"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/installer/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "downloading",
                "progress": 6
            })))
            .mount(&server)
            .await;

        let (client, _rx) = client_for(&server);
        let catalog = client.initialize().await;
        assert!(catalog.destinations.error().is_some());
        assert!(catalog.presets().is_empty());
        assert_eq!(client.tasks().await.len(), 2);
        assert!(client.is_polling("t1"));
        assert!(!client.is_polling("t2"));
        client.shutdown();
    }
}
