//! Message / information-collection form posting executor.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{ActionError, ActionExecutor, post_json};
use crate::config::UserConfig;
use crate::session::SessionHandle;

const QUERY_PATH: &str = "wec-counselor-collector-apps/stu/collector/queryCollectorProcessingList";
const DETAIL_PATH: &str = "wec-counselor-collector-apps/stu/collector/detailCollector";
const FIELDS_PATH: &str = "wec-counselor-collector-apps/stu/collector/getFormFields";
const SUBMIT_PATH: &str = "wec-counselor-collector-apps/stu/collector/submitForm";

pub struct MessagePostExecutor;

impl MessagePostExecutor {
    /// Answer one form field, preferring the user's configured answer keyed by
    /// field title; selection fields fall back to their first option, free
    /// text fields to empty.
    fn answer_field(user: &UserConfig, field: &Value) -> Value {
        let title = field.get("title").and_then(Value::as_str).unwrap_or("");
        let mut answered = field.clone();
        if let Some(answer) = user.form_answers.get(title) {
            answered["value"] = json!(answer);
        } else if let Some(first) = field
            .get("fieldItems")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
        {
            answered["value"] = first.get("content").cloned().unwrap_or(json!(""));
        } else {
            answered["value"] = json!("");
        }
        answered["hasValue"] = json!(true);
        answered
    }
}

#[async_trait]
impl ActionExecutor for MessagePostExecutor {
    fn name(&self) -> &'static str {
        "message post"
    }

    async fn run(
        &self,
        session: &SessionHandle,
        user: &UserConfig,
    ) -> Result<String, ActionError> {
        let pending = post_json(
            session,
            QUERY_PATH,
            json!({ "pageSize": 6, "pageNumber": 1 }),
        )
        .await?;

        let rows = pending
            .get("rows")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let Some(collector) = rows
            .iter()
            .find(|row| row.get("isHandled").and_then(Value::as_i64) != Some(1))
        else {
            if rows.is_empty() {
                return Err(ActionError::nothing_to_do(
                    "no collection form is waiting to be filled",
                ));
            }
            return Err(ActionError::already_done(
                "all pending collection forms are already handled",
            ));
        };

        let collector_wid = collector.get("wid").cloned().unwrap_or(Value::Null);
        let detail = post_json(
            session,
            DETAIL_PATH,
            json!({ "collectorWid": collector_wid.clone() }),
        )
        .await?;
        let form_wid = detail
            .get("collector")
            .and_then(|c| c.get("formWid"))
            .cloned()
            .unwrap_or(Value::Null);

        let fields = post_json(
            session,
            FIELDS_PATH,
            json!({
                "pageSize": 100,
                "pageNumber": 1,
                "formWid": form_wid.clone(),
                "collectorWid": collector_wid.clone(),
            }),
        )
        .await?;

        let answered: Vec<Value> = fields
            .get("rows")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .map(|field| Self::answer_field(user, field))
            .collect();
        if answered.is_empty() {
            return Err(ActionError::impossible(
                "the collection form declares no fillable fields",
            ));
        }

        log::debug!(
            "submitting collection form with {} field(s) for '{}'",
            answered.len(),
            user.username
        );
        post_json(
            session,
            SUBMIT_PATH,
            json!({
                "formWid": form_wid,
                "collectWid": collector_wid,
                "address": user.address.clone().unwrap_or_default(),
                "form": answered,
                "uaIsCpadaily": true,
            }),
        )
        .await?;

        let subject = collector
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or("collection form");
        Ok(format!("collection form '{subject}' submitted"))
    }
}
