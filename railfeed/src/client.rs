use std::path::{Path, PathBuf};
use std::sync::Arc;

use railfeed_common::error::SinkError;
use railfeed_common::health::HealthRegistry;
use railfeed_common::row::Row;
use railfeed_common::sink::{PrintSink, RowSink, SqliteRowSink};
use railfeed_common::topics::{table_name_for, TopicDescriptor, TopicRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::FeedError;
use crate::stomp::{AckMode, Credentials, StompCodec, StompConnection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Subscribed,
}

/// One subscription session: a topic, its sink and the broker settings.
///
/// The sink is opened on construction so startup failures surface before any network
/// activity. `run` consumes the sink: it is closed during teardown and a client cannot
/// be run twice.
pub struct FeedClient {
    config: Config,
    descriptor: TopicDescriptor,
    database_path: PathBuf,
    table: String,
    sink: Arc<dyn RowSink>,
    liveness: HealthRegistry,
    state: SessionState,
    finished: bool,
}

impl FeedClient {
    pub async fn new(
        config: &Config,
        registry: &TopicRegistry,
        liveness: HealthRegistry,
    ) -> Result<Self, FeedError> {
        config.validate()?;
        let descriptor = registry.lookup(&config.topic)?.clone();
        let database_path =
            config.database_path.clone().unwrap_or_else(|| descriptor.storage.clone());
        let table = table_name_for(&database_path).to_owned();

        let sink: Arc<dyn RowSink> = if config.view {
            info!(topic = descriptor.topic.id(), "view mode, rows will not be stored");
            Arc::new(PrintSink::new(&descriptor.schema))
        } else {
            Arc::new(
                SqliteRowSink::open(
                    &database_path,
                    &table,
                    &descriptor.schema,
                    config.drop_if_exists,
                )
                .await?,
            )
        };

        Ok(Self {
            config: config.clone(),
            descriptor,
            database_path: PathBuf::from(database_path),
            table,
            sink,
            liveness,
            state: SessionState::Disconnected,
            finished: false,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn descriptor(&self) -> &TopicDescriptor {
        &self.descriptor
    }

    /// Connect, subscribe and handle messages until `shutdown` is cancelled or the
    /// broker goes away. The sink is closed and the connection dropped on every path
    /// out of here; the first error encountered is returned.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), FeedError> {
        if self.finished {
            return Err(SinkError::SinkClosed.into());
        }
        self.finished = true;

        let credentials = Credentials {
            login: self.config.username.clone(),
            passcode: self.config.password.clone(),
        };
        let codec = StompCodec::new(self.config.max_frame_bytes);

        let mut connection = match StompConnection::connect(
            &self.config.stomp_host,
            self.config.stomp_port,
            &credentials,
            codec,
        )
        .await
        {
            Ok(connection) => connection,
            Err(e) => {
                error!(host = %self.config.stomp_host, "failed to connect: {}", e);
                self.close_sink().await.ok();
                return Err(e.into());
            }
        };

        let destination = self.descriptor.destination();
        if let Err(e) = connection
            .subscribe(&destination, &self.config.subscription_id, AckMode::Auto)
            .await
        {
            error!(destination, "failed to subscribe: {}", e);
            self.close_sink().await.ok();
            return Err(e.into());
        }
        self.state = SessionState::Subscribed;

        let dispatcher = Dispatcher::new(
            self.descriptor.clone(),
            self.sink.clone(),
            self.liveness.register("dispatcher", self.config.liveness_deadline()),
            self.config.liveness_interval.0,
        );

        let session = dispatcher.run(&mut connection, &shutdown).await;
        self.state = SessionState::Disconnected;
        if let Err(e) = &session {
            error!(topic = self.descriptor.topic.id(), "session ended: {}", e);
        }

        let closed = self.close_sink().await;
        let disconnected = connection.disconnect(self.config.disconnect_timeout.0).await;
        if let Err(e) = &disconnected {
            warn!("failed to disconnect cleanly: {}", e);
        }

        session?;
        closed?;
        disconnected?;
        Ok(())
    }

    /// Every row persisted so far for this client's table, read through a separate handle.
    pub async fn load_persisted(&self) -> Result<Vec<Row>, SinkError> {
        load_persisted(&self.database_path, &self.table).await
    }

    async fn close_sink(&self) -> Result<(), SinkError> {
        let result = self.sink.close().await;
        if let Err(e) = &result {
            warn!("failed to close row sink: {}", e);
        }
        result
    }
}

/// Open `table` in the database at `path` without a live session and return its rows.
pub async fn load_persisted(path: impl AsRef<Path>, table: &str) -> Result<Vec<Row>, SinkError> {
    let sink = SqliteRowSink::attach(path, table).await?;
    let rows = sink.read_all().await;
    sink.close().await?;
    rows
}
