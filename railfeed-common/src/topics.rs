//! Static mapping from feed topic to column schema, channel and storage.
use std::fmt;
use std::str::FromStr;

use crate::error::RegistryError;
use crate::normalize::{
    MovementNormalizer, Normalizer, PerformanceNormalizer, PlanningNormalizer,
    TrainDescriberNormalizer,
};

use self::ColumnType::{Integer, Text};

/// Storage class of a persisted column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

/// Ordered column declaration. A row produced for this schema always has one value
/// per column, in this order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new<N: Into<String>>(columns: impl IntoIterator<Item = (N, ColumnType)>) -> Self {
        Self {
            columns: columns
                .into_iter()
                .map(|(name, column_type)| Column {
                    name: name.into(),
                    column_type,
                })
                .collect(),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// The feeds we know how to normalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Train movement (MVT).
    Movement,
    /// Real time public performance measure (PPM).
    Performance,
    /// Very short term planning (VSTP).
    Planning,
    /// Train describer signalling (TD).
    TrainDescriber,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::Movement,
        Topic::Performance,
        Topic::Planning,
        Topic::TrainDescriber,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Topic::Movement => "MVT",
            Topic::Performance => "PPM",
            Topic::Planning => "VSTP",
            Topic::TrainDescriber => "TD",
        }
    }

    pub fn normalizer(&self) -> &'static dyn Normalizer {
        match self {
            Topic::Movement => &MovementNormalizer,
            Topic::Performance => &PerformanceNormalizer,
            Topic::Planning => &PlanningNormalizer,
            Topic::TrainDescriber => &TrainDescriberNormalizer,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Topic {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.id() == s)
            .ok_or_else(|| RegistryError::UnknownTopic {
                topic: s.to_owned(),
                known: known_ids(Topic::ALL.iter()),
            })
    }
}

fn known_ids<'a>(topics: impl Iterator<Item = &'a Topic>) -> String {
    topics.map(Topic::id).collect::<Vec<_>>().join(", ")
}

/// Everything needed to run one subscription session for a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDescriptor {
    pub topic: Topic,
    pub schema: Schema,
    pub channel: String,
    pub storage: String,
}

impl TopicDescriptor {
    /// Subscription destination on the broker.
    pub fn destination(&self) -> String {
        format!("/topic/{}", self.channel)
    }

    /// Table name derived from the storage file name, e.g. `train_mv_all_toc.db` becomes
    /// `train_mv_all_toc`.
    pub fn table_name(&self) -> &str {
        table_name_for(&self.storage)
    }
}

/// Everything up to the first dot of the file name.
pub fn table_name_for(storage: &str) -> &str {
    let file_name = storage.rsplit(['/', '\\']).next().unwrap_or(storage);
    file_name.split('.').next().unwrap_or(file_name)
}

/// Immutable set of topic descriptors, built once at startup and passed to the feed client.
#[derive(Debug, Clone)]
pub struct TopicRegistry {
    descriptors: Vec<TopicDescriptor>,
}

impl TopicRegistry {
    pub fn new(descriptors: Vec<TopicDescriptor>) -> Self {
        Self { descriptors }
    }

    pub fn lookup(&self, topic_id: &str) -> Result<&TopicDescriptor, RegistryError> {
        self.descriptors
            .iter()
            .find(|d| d.topic.id() == topic_id)
            .ok_or_else(|| RegistryError::UnknownTopic {
                topic: topic_id.to_owned(),
                known: known_ids(self.descriptors.iter().map(|d| &d.topic)),
            })
    }

    pub fn topics(&self) -> impl Iterator<Item = Topic> + '_ {
        self.descriptors.iter().map(|d| d.topic)
    }
}

impl Default for TopicRegistry {
    fn default() -> Self {
        Self::new(vec![
            TopicDescriptor {
                topic: Topic::Movement,
                schema: movement_schema(),
                channel: "TRAIN_MVT_ALL_TOC".to_owned(),
                storage: "train_mv_all_toc.db".to_owned(),
            },
            TopicDescriptor {
                topic: Topic::Performance,
                schema: performance_schema(),
                channel: "RTPPM_ALL".to_owned(),
                storage: "train_ppm_all_toc.db".to_owned(),
            },
            TopicDescriptor {
                topic: Topic::Planning,
                schema: planning_schema(),
                channel: "VSTP_ALL".to_owned(),
                storage: "train_vstp_all_toc.db".to_owned(),
            },
            TopicDescriptor {
                topic: Topic::TrainDescriber,
                schema: train_describer_schema(),
                channel: "TD_ALL_SIG_AREA".to_owned(),
                storage: "train_td_all_toc.db".to_owned(),
            },
        ])
    }
}

pub fn movement_schema() -> Schema {
    Schema::new([
        ("event_type", Text),
        ("gbtt_timestamp", Text),
        ("original_loc_stanox", Text),
        ("planned_timestamp", Integer),
        ("timetable_variation", Text),
        ("current_train_id", Integer),
        ("next_report_run_time", Integer),
        ("reporting_stanox", Integer),
        ("actual_timestamp", Integer),
        ("correction_ind", Text),
        ("event_source", Text),
        ("platform", Text),
        ("division_code", Text),
        ("train_terminated", Text),
        ("train_id", Integer),
        ("variation_status", Text),
        ("train_service_code", Integer),
        ("toc_id", Integer),
        ("loc_stanox", Integer),
        ("auto_expected", Text),
        ("direction_ind", Text),
        ("route", Text),
        ("planned_event_type", Text),
        ("next_report_stanox", Integer),
    ])
}

pub fn performance_schema() -> Schema {
    Schema::new([
        ("code", Integer),
        ("keySymbol", Text),
        ("name", Text),
        ("Total", Integer),
        ("OnTime", Integer),
        ("Late", Integer),
        ("CancelVeryLate", Integer),
        ("PPM_rag", Text),
        ("PPM_text", Integer),
        ("RollingPPM_trendInd", Text),
        ("RollingPPM_displayFlag", Text),
        ("RollingPPM_rag", Text),
        ("RollingPPM_text", Integer),
    ])
}

pub fn planning_schema() -> Schema {
    Schema::new([
        ("schedule_id", Integer),
        ("transaction_type", Text),
        ("schedule_start_date", Text),
        ("schedule_end_date", Text),
        ("schedule_days_runs", Text),
        ("applicable_timetable", Text),
        ("CIF_bank_holiday_running", Text),
        ("CIF_train_uid", Integer),
        ("train_status", Integer),
        ("CIF_stp_indicator", Text),
    ])
}

pub fn train_describer_schema() -> Schema {
    Schema::new([
        ("MSG", Text),
        ("time", Text),
        ("area_id", Text),
        ("msg_type", Text),
        ("address", Integer),
        ("data", Integer),
        ("descr", Text),
    ])
}
