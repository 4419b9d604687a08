use crux_core::capability::{CapabilityContext, Operation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Reports,
    Users,
    PublicCctv,
    PublicChats,
}

impl Table {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Reports => "reports",
            Self::Users => "users",
            Self::PublicCctv => "public_cctv",
            Self::PublicChats => "public_chats",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bucket {
    Evidence,
    ChatMedia,
}

impl Bucket {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Evidence => "evidence",
            Self::ChatMedia => "chat-media",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Eq { column: String, value: Value },
    Neq { column: String, value: Value },
    Gt { column: String, value: Value },
    Gte { column: String, value: Value },
    Lte { column: String, value: Value },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn neq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Neq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gte {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lte {
            column: column.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn column(&self) -> &str {
        match self {
            Self::Eq { column, .. }
            | Self::Neq { column, .. }
            | Self::Gt { column, .. }
            | Self::Gte { column, .. }
            | Self::Lte { column, .. } => column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectQuery {
    pub table: Table,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<u32>,
}

impl SelectQuery {
    #[must_use]
    pub fn from(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn has_filter_on(&self, column: &str) -> bool {
        self.filters.iter().any(|f| f.column() == column)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackendOperation {
    Select(SelectQuery),
    Insert {
        table: Table,
        row: Value,
    },
    Upsert {
        table: Table,
        row: Value,
    },
    Update {
        table: Table,
        filters: Vec<Filter>,
        patch: Value,
    },
    Delete {
        table: Table,
        filters: Vec<Filter>,
    },
    Upload {
        bucket: Bucket,
        path: String,
        content_type: String,
        data: Vec<u8>,
    },
}

impl BackendOperation {
    #[must_use]
    pub const fn table(&self) -> Option<Table> {
        match self {
            Self::Select(query) => Some(query.table),
            Self::Insert { table, .. }
            | Self::Upsert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. } => Some(*table),
            Self::Upload { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BackendResponse {
    Rows(Vec<Value>),
    Uploaded { public_url: String },
    Ack,
}

impl BackendResponse {
    /// Decodes every row that matches `T`; malformed rows are logged and skipped.
    pub fn into_rows<T: DeserializeOwned>(self) -> Result<Vec<T>, BackendError> {
        match self {
            Self::Rows(rows) => Ok(rows
                .into_iter()
                .filter_map(|row| match serde_json::from_value::<T>(row) {
                    Ok(decoded) => Some(decoded),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping malformed backend row");
                        None
                    }
                })
                .collect()),
            Self::Ack => Ok(Vec::new()),
            Self::Uploaded { .. } => Err(BackendError::UnexpectedResponse(
                "expected rows, got upload receipt".into(),
            )),
        }
    }

    pub fn into_first_row<T: DeserializeOwned>(self) -> Result<Option<T>, BackendError> {
        Ok(self.into_rows::<T>()?.into_iter().next())
    }

    pub fn into_public_url(self) -> Result<String, BackendError> {
        match self {
            Self::Uploaded { public_url } => Ok(public_url),
            _ => Err(BackendError::UnexpectedResponse(
                "expected upload receipt".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),

    #[error("query rejected: {message}")]
    Rejected {
        message: String,
        #[serde(default)]
        code: Option<String>,
    },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("upload too large: {size} bytes (max {max})")]
    UploadTooLarge { size: usize, max: usize },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl BackendError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

pub type BackendResult = Result<BackendResponse, BackendError>;

impl Operation for BackendOperation {
    type Output = BackendResult;
}

/// Table and object-storage access of the hosted backend.
#[derive(crux_core::macros::Capability)]
pub struct Backend<Ev> {
    context: CapabilityContext<BackendOperation, Ev>,
}

impl<Ev> Backend<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<BackendOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn select<F>(&self, query: SelectQuery, make_event: F)
    where
        F: FnOnce(BackendResult) -> Ev + Send + 'static,
    {
        self.request(BackendOperation::Select(query), make_event);
    }

    pub fn insert<F>(&self, table: Table, row: Value, make_event: F)
    where
        F: FnOnce(BackendResult) -> Ev + Send + 'static,
    {
        self.request(BackendOperation::Insert { table, row }, make_event);
    }

    pub fn upsert<F>(&self, table: Table, row: Value, make_event: F)
    where
        F: FnOnce(BackendResult) -> Ev + Send + 'static,
    {
        self.request(BackendOperation::Upsert { table, row }, make_event);
    }

    pub fn update<F>(&self, table: Table, filters: Vec<Filter>, patch: Value, make_event: F)
    where
        F: FnOnce(BackendResult) -> Ev + Send + 'static,
    {
        self.request(
            BackendOperation::Update {
                table,
                filters,
                patch,
            },
            make_event,
        );
    }

    pub fn delete<F>(&self, table: Table, filters: Vec<Filter>, make_event: F)
    where
        F: FnOnce(BackendResult) -> Ev + Send + 'static,
    {
        self.request(BackendOperation::Delete { table, filters }, make_event);
    }

    pub fn upload<F>(
        &self,
        bucket: Bucket,
        path: String,
        content_type: String,
        data: Vec<u8>,
        make_event: F,
    ) where
        F: FnOnce(BackendResult) -> Ev + Send + 'static,
    {
        if data.len() > MAX_UPLOAD_BYTES {
            let error = BackendError::UploadTooLarge {
                size: data.len(),
                max: MAX_UPLOAD_BYTES,
            };
            let ctx = self.context.clone();
            self.context.spawn(async move {
                ctx.update_app(make_event(Err(error)));
            });
            return;
        }

        self.request(
            BackendOperation::Upload {
                bucket,
                path,
                content_type,
                data,
            },
            make_event,
        );
    }

    fn request<F>(&self, operation: BackendOperation, make_event: F)
    where
        F: FnOnce(BackendResult) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let result = ctx.request_from_shell(operation).await;
            ctx.update_app(make_event(result));
        });
    }
}
