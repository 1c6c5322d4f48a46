//! The per-test execution context.
//!
//! A [`TestContext`] owns everything one test run mutates: the entity
//! registry, the set of enabled fail-point guards, and an internal client
//! used for setup and for assertions that must bypass the entities under
//! observation. It is cheap to clone (shared state sits behind `Arc`) so
//! thread entities can execute operations against the same registry.

use std::sync::{Arc, Mutex};

use mongodb::{
    bson::Document,
    options::{
        Acknowledgment,
        ClientOptions,
        CollectionOptions,
        CreateCollectionOptions,
        GridFsBucketOptions,
        InsertManyOptions,
        WriteConcern,
    },
    Client,
};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::{
    entity::{ClientEntity, Entity, SessionEntity, ThreadEntity, ThreadMessage},
    error::{Error, Result},
    fail_point::FailPointGuard,
    operation::Operation,
    registry::EntityRegistry,
    results::ResultValue,
    test_file::{CollectionData, EntitySpec, OperationDescription},
};

/// The outcome of one interpreted step: the produced value and the verdict
/// of comparing it against the step's expectations. A mismatch carries the
/// human-readable reason for diagnostics.
#[derive(Debug)]
pub struct OperationOutcome {
    pub result: ResultValue,
    pub matched: std::result::Result<(), String>,
}

impl OperationOutcome {
    pub fn is_match(&self) -> bool {
        self.matched.is_ok()
    }
}

#[derive(Clone)]
pub struct TestContext {
    pub(crate) registry: Arc<RwLock<EntityRegistry>>,
    pub(crate) fail_point_guards: Arc<RwLock<Vec<FailPointGuard>>>,
    internal_client: Client,
    base_options: ClientOptions,
    path: String,
}

impl TestContext {
    /// Creates a context for one test run. `base_options` point at the
    /// deployment under test; `path` identifies the test in diagnostics.
    pub fn new(base_options: ClientOptions, path: impl Into<String>) -> Result<Self> {
        let internal_client = Client::with_options(base_options.clone())?;
        Ok(Self {
            registry: Arc::new(RwLock::new(EntityRegistry::new())),
            fail_point_guards: Arc::new(RwLock::new(Vec::new())),
            internal_client,
            base_options,
            path: path.into(),
        })
    }

    /// The client used for setup and registry-independent assertions.
    pub fn internal_client(&self) -> &Client {
        &self.internal_client
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Creates and registers every entity named in `specs`, in order.
    /// Later specs may refer to earlier ones (a collection to its database,
    /// a session to its client).
    pub async fn load_entities(&self, specs: &[EntitySpec]) -> Result<()> {
        for spec in specs {
            match spec {
                EntitySpec::Client(client) => {
                    let mut options = match &client.uri {
                        Some(uri) => ClientOptions::parse(uri).await?,
                        None => self.base_options.clone(),
                    };
                    if let Some(overrides) = &client.uri_options {
                        apply_uri_options(&mut options, overrides);
                    }
                    if client.use_multiple_mongoses == Some(false) && options.hosts.len() > 1 {
                        options.hosts.truncate(1);
                    }
                    let ignore = client
                        .ignore_command_monitoring_events
                        .clone()
                        .unwrap_or_default();
                    let entity = ClientEntity::connect(options, ignore)?;
                    self.registry.write().await.register(&client.id, entity)?;
                }
                EntitySpec::Database(database) => {
                    let handle = {
                        let registry = self.registry.read().await;
                        let client = registry.client(&database.client)?;
                        match &database.database_options {
                            Some(options) => client.database_with_options(
                                &database.database_name,
                                options.as_database_options(),
                            ),
                            None => client.database(&database.database_name),
                        }
                    };
                    self.registry.write().await.register(&database.id, handle)?;
                }
                EntitySpec::Collection(collection) => {
                    let handle = {
                        let registry = self.registry.read().await;
                        let database = registry.database(&collection.database)?;
                        match &collection.collection_options {
                            Some(options) => database.collection_with_options::<Document>(
                                &collection.collection_name,
                                options.as_collection_options(),
                            ),
                            None => {
                                database.collection::<Document>(&collection.collection_name)
                            }
                        }
                    };
                    self.registry
                        .write()
                        .await
                        .register(&collection.id, handle)?;
                }
                EntitySpec::Session(session) => {
                    let client_session = {
                        let registry = self.registry.read().await;
                        let client = registry.client(&session.client)?;
                        client.start_session(session.session_options.clone()).await?
                    };
                    let entity = SessionEntity::new(session.client.clone(), client_session);
                    self.registry.write().await.register(&session.id, entity)?;
                }
                EntitySpec::Bucket(bucket) => {
                    let handle = {
                        let registry = self.registry.read().await;
                        let database = registry.database(&bucket.database)?;
                        database.gridfs_bucket(bucket_options(bucket.bucket_options.as_ref())?)
                    };
                    self.registry.write().await.register(&bucket.id, handle)?;
                }
                EntitySpec::Thread(thread) => {
                    let entity = self.spawn_thread();
                    self.registry
                        .write()
                        .await
                        .register(&thread.id, Entity::Thread(entity))?;
                }
            }
        }
        Ok(())
    }

    fn spawn_thread(&self) -> ThreadEntity {
        let (sender, mut receiver) = mpsc::unbounded_channel::<ThreadMessage>();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let entity = ThreadEntity {
            sender,
            failures: failures.clone(),
        };
        let ctx = self.clone();
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                match message {
                    ThreadMessage::Run(description) => {
                        match ctx.run_operation(&description).await {
                            Ok(outcome) => {
                                if let Err(mismatch) = outcome.matched {
                                    failures
                                        .lock()
                                        .unwrap()
                                        .push(format!("{}: {}", description.name, mismatch));
                                }
                            }
                            Err(error) => failures.lock().unwrap().push(error.to_string()),
                        }
                    }
                    ThreadMessage::Stop(ack) => {
                        let _ = ack.send(());
                        break;
                    }
                }
            }
        });
        entity
    }

    /// Drops and re-seeds one collection with majority write concern, so
    /// every node observes the initial state before the test begins.
    pub async fn insert_initial_data(&self, data: &CollectionData) -> Result<()> {
        let write_concern = WriteConcern::builder().w(Acknowledgment::Majority).build();
        let collection_options = CollectionOptions::builder()
            .write_concern(write_concern.clone())
            .build();
        let collection = self
            .internal_client
            .database(&data.database_name)
            .collection_with_options::<Document>(&data.collection_name, collection_options);
        collection.drop(None).await?;
        if data.documents.is_empty() {
            let options = CreateCollectionOptions::builder()
                .write_concern(write_concern)
                .build();
            self.internal_client
                .database(&data.database_name)
                .create_collection(&data.collection_name, options)
                .await?;
        } else {
            let options = InsertManyOptions::builder()
                .write_concern(write_concern)
                .build();
            collection
                .insert_many(data.documents.clone(), options)
                .await?;
        }
        Ok(())
    }

    /// The single per-step entry point: decode, execute, verify.
    pub async fn run_operation(
        &self,
        description: &OperationDescription,
    ) -> Result<OperationOutcome> {
        let operation = Operation::decode(description)?;
        debug!(operation = %operation.name, "executing operation");
        let result = operation.execute(self).await?;
        let registry = self.registry.read().await;
        let matched = operation.verify(&result, Some(&*registry));
        Ok(OperationOutcome { result, matched })
    }

    /// Unconditional cleanup: disables every fail point still enabled (in
    /// acquisition order, logging rather than escalating failures), ends
    /// all sessions, and stops thread executors. Safe to call more than
    /// once.
    pub async fn teardown(&self) {
        let guards = std::mem::take(&mut *self.fail_point_guards.write().await);
        for mut guard in guards {
            if let Err(error) = guard.release().await {
                warn!(
                    fail_point = guard.name(),
                    error = %error,
                    "failed disabling fail point during teardown"
                );
            }
        }

        let mut registry = self.registry.write().await;
        for (id, session) in registry.sessions_mut() {
            // Already-ended sessions are fine here.
            let _ = session.end(id);
        }
        registry.remove_threads();
    }
}

/// Layers the typed connection options a client spec declares over the
/// options parsed from the base URI.
fn apply_uri_options(options: &mut ClientOptions, overrides: &ClientOptions) {
    if overrides.retry_writes.is_some() {
        options.retry_writes = overrides.retry_writes;
    }
    if overrides.retry_reads.is_some() {
        options.retry_reads = overrides.retry_reads;
    }
    if overrides.write_concern.is_some() {
        options.write_concern = overrides.write_concern.clone();
    }
    if overrides.read_concern.is_some() {
        options.read_concern = overrides.read_concern.clone();
    }
    if overrides.heartbeat_freq.is_some() {
        options.heartbeat_freq = overrides.heartbeat_freq;
    }
    if overrides.app_name.is_some() {
        options.app_name = overrides.app_name.clone();
    }
    if overrides.direct_connection.is_some() {
        options.direct_connection = overrides.direct_connection;
    }
    if overrides.max_pool_size.is_some() {
        options.max_pool_size = overrides.max_pool_size;
    }
    if overrides.server_selection_timeout.is_some() {
        options.server_selection_timeout = overrides.server_selection_timeout;
    }
}

fn bucket_options(spec: Option<&Document>) -> Result<Option<GridFsBucketOptions>> {
    let spec = match spec {
        Some(spec) => spec,
        None => return Ok(None),
    };
    let mut options = GridFsBucketOptions::builder().build();
    for (key, value) in spec {
        match key.as_str() {
            "bucketName" => {
                options.bucket_name = value.as_str().map(str::to_string);
            }
            "chunkSizeBytes" => {
                options.chunk_size_bytes = value.as_i32().map(|size| size as u32);
            }
            other => {
                return Err(Error::unsupported_argument(
                    "bucket",
                    format!("unknown bucket option {:?}", other),
                ))
            }
        }
    }
    Ok(Some(options))
}
