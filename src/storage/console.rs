//! Console output fact rows.

use sqlx::{Sqlite, Transaction};

use crate::models::ConsoleMessage;

use super::id_store::IdStore;
use super::inserter::{RowInserter, SqlValue};

/// Writes `fact_console_output`, deduplicating messages and their
/// JavaScript origins into dimensions.
pub(crate) struct ConsoleStore {
    messages: IdStore,
    origins: IdStore,
}

impl ConsoleStore {
    pub(crate) fn new() -> Self {
        Self {
            messages: IdStore::new("dim_console_messages", &["message"]),
            origins: IdStore::new("dim_javascript_origin", &["func", "col", "line"]),
        }
    }

    pub(crate) async fn save(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        session_id: i64,
        console: &[ConsoleMessage],
    ) -> Result<(), sqlx::Error> {
        for (i, message) in console.iter().enumerate() {
            let msg_id = self
                .messages
                .get(tx, &[SqlValue::from(message.msg.clone())])
                .await?;

            // Messages without a stack frame share the empty origin.
            let (func, col, line) = match &message.frame {
                Some(frame) => (
                    frame.function.clone().unwrap_or_default(),
                    frame.column,
                    frame.line,
                ),
                None => (String::new(), 0, 0),
            };
            let origin_id = self
                .origins
                .get(
                    tx,
                    &[
                        SqlValue::from(func),
                        SqlValue::Int(col),
                        SqlValue::Int(line),
                    ],
                )
                .await?;

            RowInserter::new("fact_console_output")
                .column("session_id", session_id)
                .column("seq", (i + 1) as i64)
                .column("javascript_origin_id", origin_id)
                .column("msg_id", msg_id)
                .insert(tx)
                .await?;
        }

        Ok(())
    }
}
