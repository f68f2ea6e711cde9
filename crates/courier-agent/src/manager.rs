use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier_history::SessionResolver;
use courier_options::{OptionsBuilder, OptionsRequest};
use courier_protocol::{AgentResult, SlashCommand};
use courier_store::SessionStore;

use crate::actor::{ExitCallback, UserAgent, UserAgentSpec};
use crate::client::AgentClientFactory;

/// Inputs to [`AgentManager::get_or_connect`].
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub user_id: i64,
    pub directory: PathBuf,
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub betas: Option<Vec<String>>,
    pub approved_directory: Option<PathBuf>,
    pub force_new: bool,
}

impl ConnectRequest {
    pub fn new(user_id: i64, directory: impl Into<PathBuf>) -> Self {
        Self {
            user_id,
            directory: directory.into(),
            session_id: None,
            model: None,
            betas: None,
            approved_directory: None,
            force_new: false,
        }
    }
}

struct ManagerInner {
    clients: Mutex<HashMap<i64, Arc<UserAgent>>>,
    factory: Arc<dyn AgentClientFactory>,
    options: OptionsBuilder,
    resolver: SessionResolver,
    store: Arc<SessionStore>,
    idle_timeout: Duration,
}

/// Owns the user → actor map and the session resolution order:
/// explicit id > persisted record (same directory) > CLI history > fresh.
#[derive(Clone)]
pub struct AgentManager {
    inner: Arc<ManagerInner>,
}

impl AgentManager {
    pub fn new(
        factory: Arc<dyn AgentClientFactory>,
        options: OptionsBuilder,
        resolver: SessionResolver,
        store: Arc<SessionStore>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                clients: Mutex::new(HashMap::new()),
                factory,
                options,
                resolver,
                store,
                idle_timeout,
            }),
        }
    }

    pub fn resolver(&self) -> &SessionResolver {
        &self.inner.resolver
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.inner.store
    }

    pub async fn get_or_connect(&self, request: ConnectRequest) -> AgentResult<Arc<UserAgent>> {
        let existing = self.active(request.user_id);
        if let Some(existing) = existing {
            if existing.is_running()
                && existing.directory() == request.directory
                && !request.force_new
            {
                existing.touch();
                return Ok(existing);
            }
            existing.stop().await;
            self.remove_if_same(request.user_id, &existing);
        }

        let directory_str = request.directory.to_string_lossy().into_owned();
        let mut session_id = request.session_id.clone();
        let mut model = request.model.clone();
        let mut betas = request.betas.clone();

        if session_id.is_none() && !request.force_new {
            match self.inner.store.get_by_user(request.user_id) {
                Ok(Some(record)) if record.directory == directory_str => {
                    if !record.session_id.is_empty() {
                        session_id = Some(record.session_id);
                    }
                    if model.is_none() {
                        model = record.model;
                    }
                    if betas.is_none() {
                        betas = record.betas;
                    }
                }
                Ok(_) => {
                    session_id = self.inner.resolver.latest_session(&request.directory);
                }
                Err(error) => {
                    tracing::warn!(
                        user_id = request.user_id,
                        error = %error,
                        "session store read failed; falling back to CLI history"
                    );
                    session_id = self.inner.resolver.latest_session(&request.directory);
                }
            }
        }

        let options = self.inner.options.build(OptionsRequest {
            cwd: request.directory.clone(),
            session_id: session_id.clone(),
            model: model.clone(),
            betas: betas.clone().unwrap_or_default(),
            approved_directory: request.approved_directory.clone(),
        })?;
        let client = self.inner.factory.create(&options)?;

        let actor = UserAgent::new(
            UserAgentSpec {
                user_id: request.user_id,
                directory: request.directory.clone(),
                session_id: session_id.clone(),
                model: model.clone(),
                betas: betas.clone().unwrap_or_default(),
                idle_timeout: self.inner.idle_timeout,
            },
            self.exit_callback(),
        );
        actor.start(client).await?;

        self.inner
            .clients
            .lock()
            .expect("clients lock")
            .insert(request.user_id, Arc::clone(&actor));

        // An empty session id is fine here; the SDK mints one on first reply
        // and update_session_id persists it.
        if let Err(error) = self.inner.store.upsert(
            request.user_id,
            session_id.as_deref().unwrap_or(""),
            &directory_str,
            model.as_deref(),
            betas.as_deref(),
        ) {
            tracing::warn!(
                user_id = request.user_id,
                error = %error,
                "failed to persist session record"
            );
        }

        tracing::info!(
            user_id = request.user_id,
            directory = %request.directory.display(),
            session_id = ?session_id,
            "agent manager connected"
        );
        Ok(actor)
    }

    /// Drop the current actor and connect to an explicit session.
    pub async fn switch_session(
        &self,
        mut request: ConnectRequest,
        session_id: String,
    ) -> AgentResult<Arc<UserAgent>> {
        self.disconnect(request.user_id).await;
        request.session_id = Some(session_id);
        request.force_new = false;
        self.get_or_connect(request).await
    }

    /// Adopt the session id reported by a terminal result message: update the
    /// actor, persist the record, and make the session discoverable from the
    /// CLI side.
    pub fn update_session_id(&self, user_id: i64, session_id: &str, display: &str) {
        let Some(actor) = self.active(user_id) else {
            return;
        };
        actor.set_session_id(Some(session_id.to_owned()));

        let directory = actor.directory().to_string_lossy().into_owned();
        let betas = actor.betas();
        if let Err(error) = self.inner.store.upsert(
            user_id,
            session_id,
            &directory,
            actor.model().as_deref(),
            (!betas.is_empty()).then_some(betas.as_slice()),
        ) {
            tracing::warn!(user_id, error = %error, "failed to persist session id");
        }

        if self.inner.resolver.find_session(session_id).is_none() {
            self.inner
                .resolver
                .record_session(session_id, display, &directory);
        }
    }

    /// Update the model used on the next connect and persist it.
    pub fn set_model(&self, user_id: i64, model: &str, betas: Option<Vec<String>>) {
        let Some(actor) = self.active(user_id) else {
            return;
        };
        actor.set_model(Some(model.to_owned()), betas);

        let directory = actor.directory().to_string_lossy().into_owned();
        let actor_betas = actor.betas();
        if let Err(error) = self.inner.store.upsert(
            user_id,
            actor.session_id().as_deref().unwrap_or(""),
            &directory,
            Some(model),
            (!actor_betas.is_empty()).then_some(actor_betas.as_slice()),
        ) {
            tracing::warn!(user_id, error = %error, "failed to persist model change");
        }
    }

    pub async fn interrupt(&self, user_id: i64) -> AgentResult<()> {
        match self.active(user_id) {
            Some(actor) => actor.interrupt().await,
            None => Ok(()),
        }
    }

    pub async fn disconnect(&self, user_id: i64) {
        let actor = self
            .inner
            .clients
            .lock()
            .expect("clients lock")
            .remove(&user_id);
        if let Some(actor) = actor {
            actor.stop().await;
        }
    }

    pub async fn disconnect_all(&self) {
        let user_ids: Vec<i64> = self
            .inner
            .clients
            .lock()
            .expect("clients lock")
            .keys()
            .copied()
            .collect();
        for user_id in user_ids {
            self.disconnect(user_id).await;
        }
    }

    pub fn active(&self, user_id: i64) -> Option<Arc<UserAgent>> {
        self.inner
            .clients
            .lock()
            .expect("clients lock")
            .get(&user_id)
            .cloned()
    }

    pub fn available_commands(&self, user_id: i64) -> Vec<SlashCommand> {
        self.active(user_id)
            .map(|actor| actor.available_commands())
            .unwrap_or_default()
    }

    pub fn has_command(&self, user_id: i64, name: &str) -> bool {
        self.active(user_id)
            .map(|actor| actor.has_command(name))
            .unwrap_or(false)
    }

    fn exit_callback(&self) -> ExitCallback {
        let inner = Arc::downgrade(&self.inner);
        Arc::new(move |user_id| {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut clients = inner.clients.lock().expect("clients lock");
            // A replacement actor may already hold the slot; only reap the
            // entry when it is actually dead.
            let stale = clients
                .get(&user_id)
                .map(|actor| !actor.is_running())
                .unwrap_or(false);
            if stale {
                clients.remove(&user_id);
                tracing::info!(user_id, "agent actor removed after exit");
            }
        })
    }

    fn remove_if_same(&self, user_id: i64, actor: &Arc<UserAgent>) {
        let mut clients = self.inner.clients.lock().expect("clients lock");
        if clients
            .get(&user_id)
            .map(|current| Arc::ptr_eq(current, actor))
            .unwrap_or(false)
        {
            clients.remove(&user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::{sleep, Instant};

    use super::*;
    use crate::test_support::{MockAgentClient, ScriptedClientFactory};

    struct Env {
        manager: AgentManager,
        factory: Arc<ScriptedClientFactory>,
        store: Arc<SessionStore>,
        config_dir: tempfile::TempDir,
        workdir: tempfile::TempDir,
    }

    fn env() -> Env {
        let config_dir = tempfile::tempdir().expect("config dir");
        let workdir = tempfile::tempdir().expect("workdir");
        let factory = ScriptedClientFactory::new();
        let store = Arc::new(SessionStore::in_memory().expect("open store"));
        let manager = AgentManager::new(
            factory.clone(),
            OptionsBuilder::new(config_dir.path(), "agent"),
            SessionResolver::new(config_dir.path()),
            Arc::clone(&store),
            Duration::from_secs(3600),
        );
        Env {
            manager,
            factory,
            store,
            config_dir,
            workdir,
        }
    }

    fn workdir_string(env: &Env) -> String {
        env.workdir.path().to_string_lossy().into_owned()
    }

    async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn running_actor_with_matching_directory_is_reused() {
        let env = env();
        let request = ConnectRequest::new(42, env.workdir.path());

        let first = env.manager.get_or_connect(request.clone()).await.expect("connect");
        let second = env.manager.get_or_connect(request).await.expect("reconnect");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(env.factory.created().len(), 1);
    }

    #[tokio::test]
    async fn directory_change_evicts_the_old_actor() {
        let env = env();
        let other_dir = tempfile::tempdir().expect("other workdir");

        let first = env
            .manager
            .get_or_connect(ConnectRequest::new(7, env.workdir.path()))
            .await
            .expect("connect in first directory");
        let second = env
            .manager
            .get_or_connect(ConnectRequest::new(7, other_dir.path()))
            .await
            .expect("connect in second directory");

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!first.is_running());
        assert!(second.is_running());
        let created = env.factory.created();
        assert_eq!(created.len(), 2);
        assert!(created[0].1.was_disconnected());
        assert_eq!(created[1].0.cwd, other_dir.path());

        let record = env.store.get_by_user(7).expect("query").expect("row exists");
        assert_eq!(record.directory, other_dir.path().to_string_lossy());

        // Exactly one live entry for the user.
        assert!(env.manager.active(7).is_some());
        assert!(Arc::ptr_eq(&env.manager.active(7).expect("active"), &second));
    }

    #[tokio::test]
    async fn persisted_record_supplies_session_model_and_betas() {
        let env = env();
        let betas = vec!["context-1m".to_owned()];
        env.store
            .upsert(9, "sess-db", &workdir_string(&env), Some("sonnet"), Some(&betas))
            .expect("seed record");

        env.manager
            .get_or_connect(ConnectRequest::new(9, env.workdir.path()))
            .await
            .expect("connect");

        let (options, _) = &env.factory.created()[0];
        assert_eq!(options.resume_session.as_deref(), Some("sess-db"));
        assert_eq!(options.model.as_deref(), Some("sonnet"));
        assert_eq!(options.betas, betas);
    }

    #[tokio::test]
    async fn history_file_is_the_fallback_when_no_record_matches() {
        let env = env();
        let project = env
            .workdir
            .path()
            .canonicalize()
            .expect("canonicalize workdir");
        std::fs::write(
            env.config_dir.path().join("history.jsonl"),
            format!(
                "{}\n",
                serde_json::json!({
                    "sessionId": "sess-hist",
                    "display": "earlier work",
                    "timestamp": 1000,
                    "project": project.to_string_lossy(),
                })
            ),
        )
        .expect("write history");

        env.manager
            .get_or_connect(ConnectRequest::new(9, &project))
            .await
            .expect("connect");

        let (options, _) = &env.factory.created()[0];
        assert_eq!(options.resume_session.as_deref(), Some("sess-hist"));
    }

    #[tokio::test]
    async fn force_new_skips_session_resolution() {
        let env = env();
        env.store
            .upsert(9, "sess-db", &workdir_string(&env), None, None)
            .expect("seed record");

        env.manager
            .get_or_connect(ConnectRequest {
                force_new: true,
                ..ConnectRequest::new(9, env.workdir.path())
            })
            .await
            .expect("connect");

        let (options, _) = &env.factory.created()[0];
        assert_eq!(options.resume_session, None);
    }

    #[tokio::test]
    async fn update_session_id_persists_and_records_history() {
        let env = env();
        env.manager
            .get_or_connect(ConnectRequest::new(42, env.workdir.path()))
            .await
            .expect("connect");

        env.manager.update_session_id(42, "sess-new", "fix the parser");

        let actor = env.manager.active(42).expect("actor present");
        assert_eq!(actor.session_id().as_deref(), Some("sess-new"));

        let record = env.store.get_by_user(42).expect("query").expect("row exists");
        assert_eq!(record.session_id, "sess-new");

        let entry = env
            .manager
            .resolver()
            .find_session("sess-new")
            .expect("history entry recorded");
        assert_eq!(entry.display, "fix the parser");
    }

    #[tokio::test]
    async fn switch_session_reconnects_with_the_explicit_id() {
        let env = env();
        let first = env
            .manager
            .get_or_connect(ConnectRequest::new(5, env.workdir.path()))
            .await
            .expect("initial connect");

        let second = env
            .manager
            .switch_session(ConnectRequest::new(5, env.workdir.path()), "sess-pick".to_owned())
            .await
            .expect("switch session");

        assert!(!Arc::ptr_eq(&first, &second));
        let created = env.factory.created();
        assert_eq!(created.len(), 2);
        assert_eq!(created[1].0.resume_session.as_deref(), Some("sess-pick"));
    }

    #[tokio::test]
    async fn disconnect_removes_the_map_entry() {
        let env = env();
        env.manager
            .get_or_connect(ConnectRequest::new(1, env.workdir.path()))
            .await
            .expect("connect");

        env.manager.disconnect(1).await;

        assert!(env.manager.active(1).is_none());
        assert!(env.manager.available_commands(1).is_empty());
    }

    #[tokio::test]
    async fn actor_exit_reaps_the_entry() {
        let env = env();
        let actor = env
            .manager
            .get_or_connect(ConnectRequest::new(3, env.workdir.path()))
            .await
            .expect("connect");

        actor.stop().await;

        wait_until(|| env.manager.active(3).is_none(), "entry reaped").await;
    }

    #[tokio::test]
    async fn commands_are_served_from_the_actor_cache() {
        let env = env();
        env.factory
            .prepare(MockAgentClient::new().with_commands(&["compact"]));

        env.manager
            .get_or_connect(ConnectRequest::new(2, env.workdir.path()))
            .await
            .expect("connect");

        wait_until(|| env.manager.has_command(2, "compact"), "command cache").await;
        assert_eq!(env.manager.available_commands(2).len(), 1);
        assert!(!env.manager.has_command(2, "missing"));
    }

    #[tokio::test]
    async fn disconnect_all_stops_every_actor() {
        let env = env();
        let other_dir = tempfile::tempdir().expect("other workdir");
        env.manager
            .get_or_connect(ConnectRequest::new(1, env.workdir.path()))
            .await
            .expect("connect user 1");
        env.manager
            .get_or_connect(ConnectRequest::new(2, other_dir.path()))
            .await
            .expect("connect user 2");

        env.manager.disconnect_all().await;

        assert!(env.manager.active(1).is_none());
        assert!(env.manager.active(2).is_none());
        for (_, client) in env.factory.created() {
            assert!(client.was_disconnected());
        }
    }
}
