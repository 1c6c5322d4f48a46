//! Live handles under test.
//!
//! An [`Entity`] is a named handle created during test setup and owned by
//! the registry for the duration of one test run: a driver client wrapped
//! with event capture, a database or collection handle, an explicit session
//! with its interpreter-tracked state, a GridFS bucket, or a spawned
//! concurrent executor.

use std::{fmt, ops::Deref, sync::Arc, time::Duration};

use mongodb::{
    bson::Document,
    gridfs::GridFsBucket,
    options::{ClientOptions, ServerAddress},
    Client,
    ClientSession,
    Collection,
    Database,
};
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};

use crate::{
    error::{Error, Result},
    events::{CommandEventBuffer, EventCollector},
    test_file::OperationDescription,
};

/// The kinds an entity identifier can resolve to, plus the test-runner
/// pseudo-target. Used in dispatch and in error reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Client,
    Database,
    Collection,
    Session,
    Bucket,
    Thread,
    TestRunner,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Client => "client",
            EntityKind::Database => "database",
            EntityKind::Collection => "collection",
            EntityKind::Session => "session",
            EntityKind::Bucket => "bucket",
            EntityKind::Thread => "thread",
            EntityKind::TestRunner => "test runner",
        };
        f.write_str(name)
    }
}

pub enum Entity {
    Client(ClientEntity),
    Database(Database),
    Collection(Collection<Document>),
    Session(SessionEntity),
    Bucket(GridFsBucket),
    Thread(ThreadEntity),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Client(_) => EntityKind::Client,
            Entity::Database(_) => EntityKind::Database,
            Entity::Collection(_) => EntityKind::Collection,
            Entity::Session(_) => EntityKind::Session,
            Entity::Bucket(_) => EntityKind::Bucket,
            Entity::Thread(_) => EntityKind::Thread,
        }
    }
}

impl From<ClientEntity> for Entity {
    fn from(client: ClientEntity) -> Self {
        Self::Client(client)
    }
}

impl From<Database> for Entity {
    fn from(database: Database) -> Self {
        Self::Database(database)
    }
}

impl From<Collection<Document>> for Entity {
    fn from(collection: Collection<Document>) -> Self {
        Self::Collection(collection)
    }
}

impl From<SessionEntity> for Entity {
    fn from(session: SessionEntity) -> Self {
        Self::Session(session)
    }
}

impl From<GridFsBucket> for Entity {
    fn from(bucket: GridFsBucket) -> Self {
        Self::Bucket(bucket)
    }
}

/// A driver client plus the command event log captured for it.
#[derive(Clone)]
pub struct ClientEntity {
    client: Client,
    events: CommandEventBuffer,
}

impl ClientEntity {
    /// Builds a client from the given options, registering event capture
    /// before the first connection is made. Commands named in `ignore` are
    /// excluded from the log.
    pub fn connect(mut options: ClientOptions, ignore: Vec<String>) -> Result<Self> {
        let events = CommandEventBuffer::new();
        options.command_event_handler =
            Some(Arc::new(EventCollector::new(events.clone(), ignore)));
        let client = Client::with_options(options)?;
        Ok(Self { client, events })
    }

    pub fn events(&self) -> &CommandEventBuffer {
        &self.events
    }
}

impl Deref for ClientEntity {
    type Target = Client;

    fn deref(&self) -> &Client {
        &self.client
    }
}

impl fmt::Debug for ClientEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientEntity").finish()
    }
}

/// The interpreter's view of a session's transaction lifecycle.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    #[default]
    None,
    Starting,
    InProgress,
    Committed,
    Aborted,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::None => "none",
            TransactionState::Starting => "starting",
            TransactionState::InProgress => "in_progress",
            TransactionState::Committed => "committed",
            TransactionState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// An explicit session entity.
///
/// The driver session is paired with state the interpreter tracks itself:
/// transaction lifecycle, the server the session is pinned to, and the
/// dirty bit. These are mutated only by operations executed through this
/// session; assertion operations read them and never write.
pub struct SessionEntity {
    pub lsid: Document,
    /// Identifier of the client entity this session was started from.
    pub client_id: String,
    session: Option<ClientSession>,
    pub(crate) transaction_state: TransactionState,
    pub(crate) pinned_server: Option<ServerAddress>,
    pub(crate) dirty: bool,
}

impl SessionEntity {
    pub fn new(client_id: String, session: ClientSession) -> Self {
        Self {
            lsid: session.id().clone(),
            client_id,
            session: Some(session),
            transaction_state: TransactionState::None,
            pinned_server: None,
            dirty: false,
        }
    }

    /// The live driver session, or `SessionEnded` if `endSession` already
    /// ran for this entity.
    pub(crate) fn session_mut(&mut self, id: &str) -> Result<&mut ClientSession> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::SessionEnded { id: id.to_string() })
    }

    /// Ends the session by dropping the driver handle, which returns the
    /// server session to the pool.
    pub(crate) fn end(&mut self, id: &str) -> Result<()> {
        match self.session.take() {
            Some(session) => {
                drop(session);
                Ok(())
            }
            None => Err(Error::SessionEnded { id: id.to_string() }),
        }
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.transaction_state
    }

    pub fn pinned_server(&self) -> Option<&ServerAddress> {
        self.pinned_server.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl fmt::Debug for SessionEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEntity")
            .field("lsid", &self.lsid)
            .field("transaction_state", &self.transaction_state)
            .field("pinned_server", &self.pinned_server)
            .field("dirty", &self.dirty)
            .finish()
    }
}

pub(crate) enum ThreadMessage {
    Run(Box<OperationDescription>),
    Stop(oneshot::Sender<()>),
}

/// A named concurrent executor: a spawned task draining a channel of
/// operation descriptions. Outcomes are recorded as they complete and
/// surfaced when the thread is joined.
#[derive(Clone)]
pub struct ThreadEntity {
    pub(crate) sender: mpsc::UnboundedSender<ThreadMessage>,
    pub(crate) failures: Arc<std::sync::Mutex<Vec<String>>>,
}

impl ThreadEntity {
    pub(crate) fn run_operation(&self, description: OperationDescription) -> bool {
        self.sender
            .send(ThreadMessage::Run(Box::new(description)))
            .is_ok()
    }

    /// Signals the executor to stop and waits for it to drain. Returns the
    /// recorded failures, or an error message if the executor hung or went
    /// away.
    pub(crate) async fn wait(&self) -> std::result::Result<Vec<String>, String> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ThreadMessage::Stop(tx))
            .map_err(|_| "thread executor has already stopped".to_string())?;
        match tokio::time::timeout(Duration::from_secs(10), rx).await {
            Ok(Ok(())) => Ok(self.failures.lock().unwrap().clone()),
            Ok(Err(_)) => Err("thread executor dropped without completing".to_string()),
            Err(_) => Err("timed out waiting for thread to complete".to_string()),
        }
    }
}
