//! Scripted agent fakes for tests, here and in downstream crates.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use courier_protocol::{
    AgentError, AgentMessage, AgentResult, ContentBlock, ResultPayload, ServerInfo, SlashCommand,
    StreamEvent, StreamSink,
};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::client::AgentClient;

type FeedItem = Result<AgentMessage, AgentError>;

enum Script {
    Messages(Vec<AgentMessage>),
    Error(AgentError),
}

pub struct MockAgentClient {
    connect_error: Mutex<Option<AgentError>>,
    commands: Mutex<Vec<SlashCommand>>,
    server_info_error: AtomicBool,
    feed_tx: Mutex<Option<mpsc::UnboundedSender<FeedItem>>>,
    feed_rx: AsyncMutex<mpsc::UnboundedReceiver<FeedItem>>,
    scripts: Mutex<VecDeque<Script>>,
    queries: Mutex<Vec<Vec<ContentBlock>>>,
    connected: AtomicBool,
    disconnected: AtomicBool,
    interrupts: AtomicU64,
    close_after_script: AtomicBool,
}

impl MockAgentClient {
    pub fn new() -> Arc<Self> {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            connect_error: Mutex::new(None),
            commands: Mutex::new(Vec::new()),
            server_info_error: AtomicBool::new(false),
            feed_tx: Mutex::new(Some(feed_tx)),
            feed_rx: AsyncMutex::new(feed_rx),
            scripts: Mutex::new(VecDeque::new()),
            queries: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            interrupts: AtomicU64::new(0),
            close_after_script: AtomicBool::new(false),
        })
    }

    pub fn with_commands(self: Arc<Self>, names: &[&str]) -> Arc<Self> {
        *self.commands.lock().expect("commands lock") = names
            .iter()
            .map(|name| SlashCommand {
                name: (*name).to_owned(),
                description: String::new(),
                argument_hint: String::new(),
            })
            .collect();
        self
    }

    pub fn with_connect_error(self: Arc<Self>, error: AgentError) -> Arc<Self> {
        *self.connect_error.lock().expect("connect error lock") = Some(error);
        self
    }

    pub fn with_server_info_error(self: Arc<Self>) -> Arc<Self> {
        self.server_info_error.store(true, Ordering::SeqCst);
        self
    }

    /// Queue the messages to emit when the next query is sent.
    pub fn push_script(&self, messages: Vec<AgentMessage>) {
        self.scripts
            .lock()
            .expect("scripts lock")
            .push_back(Script::Messages(messages));
    }

    /// Queue a stream error for the next query.
    pub fn push_error_script(&self, error: AgentError) {
        self.scripts
            .lock()
            .expect("scripts lock")
            .push_back(Script::Error(error));
    }

    /// Close the message stream once the next script drains.
    pub fn close_after_script(&self) {
        self.close_after_script.store(true, Ordering::SeqCst);
    }

    /// Push one message into the live stream, outside any script.
    pub fn emit(&self, message: AgentMessage) {
        if let Some(sender) = self.feed_tx.lock().expect("feed lock").as_ref() {
            let _ = sender.send(Ok(message));
        }
    }

    pub fn queries(&self) -> Vec<Vec<ContentBlock>> {
        self.queries.lock().expect("queries lock").clone()
    }

    pub fn was_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn was_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn interrupt_count(&self) -> u64 {
        self.interrupts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentClient for MockAgentClient {
    async fn connect(&self) -> AgentResult<()> {
        if let Some(error) = self.connect_error.lock().expect("connect error lock").take() {
            return Err(error);
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_query(&self, blocks: Vec<ContentBlock>) -> AgentResult<()> {
        self.queries.lock().expect("queries lock").push(blocks);

        let script = self.scripts.lock().expect("scripts lock").pop_front();
        if let Some(script) = script {
            let mut feed = self.feed_tx.lock().expect("feed lock");
            if let Some(sender) = feed.as_ref() {
                match script {
                    Script::Messages(messages) => {
                        for message in messages {
                            let _ = sender.send(Ok(message));
                        }
                    }
                    Script::Error(error) => {
                        let _ = sender.send(Err(error));
                    }
                }
            }
            if self.close_after_script.load(Ordering::SeqCst) {
                feed.take();
            }
        }
        Ok(())
    }

    async fn next_message(&self) -> AgentResult<Option<AgentMessage>> {
        let mut receiver = self.feed_rx.lock().await;
        match receiver.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }

    async fn interrupt(&self) -> AgentResult<()> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> AgentResult<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        self.feed_tx.lock().expect("feed lock").take();
        Ok(())
    }

    async fn server_info(&self) -> AgentResult<ServerInfo> {
        if self.server_info_error.load(Ordering::SeqCst) {
            return Err(AgentError::Protocol("no server info".to_owned()));
        }
        Ok(ServerInfo {
            commands: self.commands.lock().expect("commands lock").clone(),
        })
    }
}

pub fn assistant_text(text: &str) -> AgentMessage {
    AgentMessage::Assistant {
        content: vec![courier_protocol::AssistantBlock::Text {
            text: text.to_owned(),
        }],
    }
}

pub fn tool_use(name: &str, input: Value) -> AgentMessage {
    AgentMessage::Assistant {
        content: vec![courier_protocol::AssistantBlock::ToolUse {
            name: name.to_owned(),
            input,
        }],
    }
}

pub fn result_message(text: &str, session_id: &str, cost: f64) -> AgentMessage {
    AgentMessage::Result(ResultPayload {
        result: Some(text.to_owned()),
        session_id: Some(session_id.to_owned()),
        total_cost_usd: Some(cost),
        num_turns: None,
        duration_ms: None,
        is_error: false,
    })
}

/// Factory that hands out prepared mock clients (or fresh ones) and records
/// the options each connect produced.
pub struct ScriptedClientFactory {
    created: Mutex<Vec<(courier_options::AgentOptions, Arc<MockAgentClient>)>>,
    prepared: Mutex<VecDeque<Arc<MockAgentClient>>>,
}

impl ScriptedClientFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            created: Mutex::new(Vec::new()),
            prepared: Mutex::new(VecDeque::new()),
        })
    }

    pub fn prepare(&self, client: Arc<MockAgentClient>) {
        self.prepared.lock().expect("prepared lock").push_back(client);
    }

    pub fn created(&self) -> Vec<(courier_options::AgentOptions, Arc<MockAgentClient>)> {
        self.created.lock().expect("created lock").clone()
    }
}

impl crate::client::AgentClientFactory for ScriptedClientFactory {
    fn create(
        &self,
        options: &courier_options::AgentOptions,
    ) -> AgentResult<Arc<dyn AgentClient>> {
        let client = self
            .prepared
            .lock()
            .expect("prepared lock")
            .pop_front()
            .unwrap_or_else(MockAgentClient::new);
        self.created
            .lock()
            .expect("created lock")
            .push((options.clone(), Arc::clone(&client)));
        Ok(client)
    }
}

pub struct RecordingSink {
    events: Mutex<Vec<StreamEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().expect("events lock").clone()
    }
}

#[async_trait]
impl StreamSink for RecordingSink {
    async fn on_event(&self, event: StreamEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}
