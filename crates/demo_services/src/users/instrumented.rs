use super::store::{NewUser, StoreError, User, UserId, UserStore, UserUpdate};
use op_telemetry::{Instrumentation, Operation, SpanContext, SpanKind};
use std::sync::Arc;

const DB_SYSTEM: &str = "in-memory";
const TABLE: &str = "users";

/// User store whose calls are recorded as `db.*` client spans with the same
/// request count and duration metrics as HTTP handlers.
#[derive(Clone)]
pub struct InstrumentedUserStore {
    inner: Arc<dyn UserStore>,
    instrumentation: Instrumentation,
}

impl InstrumentedUserStore {
    pub fn new(inner: Arc<dyn UserStore>, instrumentation: Instrumentation) -> Self {
        Self {
            inner,
            instrumentation,
        }
    }

    fn operation(name: &str, statement: &'static str, parent: &SpanContext) -> Operation {
        Operation::new(name)
            .kind(SpanKind::Client)
            .attribute("db.system", DB_SYSTEM)
            .attribute("db.sql.table", TABLE)
            .attribute("db.operation", statement)
            .child_of(parent)
    }

    pub async fn list(&self, parent: &SpanContext) -> Result<Vec<User>, StoreError> {
        let operation = Self::operation("db.select_all", "SELECT", parent);
        self.instrumentation
            .run_async(operation, |_| self.inner.list())
            .await
    }

    pub async fn get(&self, id: UserId, parent: &SpanContext) -> Result<Option<User>, StoreError> {
        let operation = Self::operation("db.select", "SELECT", parent).attribute("db.user.id", id);
        self.instrumentation
            .run_async(operation, |_| self.inner.get(id))
            .await
    }

    pub async fn find_by_email(
        &self,
        email: &str,
        parent: &SpanContext,
    ) -> Result<Option<User>, StoreError> {
        let operation = Self::operation("db.select_by_email", "SELECT", parent);
        self.instrumentation
            .run_async(operation, |_| self.inner.find_by_email(email))
            .await
    }

    pub async fn insert(&self, user: NewUser, parent: &SpanContext) -> Result<User, StoreError> {
        let operation = Self::operation("db.insert", "INSERT", parent);
        self.instrumentation
            .run_async(operation, |_| self.inner.insert(user))
            .await
    }

    pub async fn update(
        &self,
        id: UserId,
        update: UserUpdate,
        parent: &SpanContext,
    ) -> Result<Option<User>, StoreError> {
        let operation = Self::operation("db.update", "UPDATE", parent).attribute("db.user.id", id);
        self.instrumentation
            .run_async(operation, |_| self.inner.update(id, update))
            .await
    }

    pub async fn delete(&self, id: UserId, parent: &SpanContext) -> Result<bool, StoreError> {
        let operation = Self::operation("db.delete", "DELETE", parent).attribute("db.user.id", id);
        self.instrumentation
            .run_async(operation, |_| self.inner.delete(id))
            .await
    }
}
