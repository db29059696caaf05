//! Daily attendance sign-in executor.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{ActionError, ActionExecutor, post_json};
use crate::config::UserConfig;
use crate::session::SessionHandle;

const QUERY_PATH: &str = "wec-counselor-sign-apps/stu/sign/getStuSignInfosInOneDay";
const DETAIL_PATH: &str = "wec-counselor-sign-apps/stu/sign/detailSignInstance";
const SUBMIT_PATH: &str = "wec-counselor-sign-apps/stu/sign/submitSign";

pub struct AttendanceExecutor;

impl AttendanceExecutor {
    fn fill_form(user: &UserConfig, task: &Value, detail: &Value) -> Result<Value, ActionError> {
        let mut form = json!({
            "signInstanceWid": task.get("signInstanceWid").cloned().unwrap_or(Value::Null),
            "signWid": task.get("signWid").cloned().unwrap_or(Value::Null),
            "longitude": user.lon,
            "latitude": user.lat,
            "isMalposition": detail.get("isMalposition").cloned().unwrap_or(json!(1)),
            "position": user.address.clone().unwrap_or_default(),
            "abnormalReason": user.abnormal_reason.clone().unwrap_or_default(),
            "signPhotoUrl": "",
            "uaIsCpadaily": true,
        });

        // Answer any extra fields the instance declares, preferring the
        // user's configured answer and falling back to the first option.
        if detail.get("isNeedExtra").and_then(Value::as_i64) == Some(1) {
            let mut items = Vec::new();
            for field in detail
                .get("extraField")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                let title = field.get("title").and_then(Value::as_str).unwrap_or("");
                let options = field
                    .get("extraFieldItems")
                    .and_then(Value::as_array)
                    .ok_or_else(|| {
                        ActionError::impossible(format!(
                            "extra field '{title}' has no selectable options"
                        ))
                    })?;
                let wanted = user.form_answers.get(title).map(String::as_str);
                let chosen = options
                    .iter()
                    .find(|option| {
                        wanted.is_some_and(|answer| {
                            option.get("content").and_then(Value::as_str) == Some(answer)
                        })
                    })
                    .or_else(|| options.first())
                    .ok_or_else(|| {
                        ActionError::impossible(format!(
                            "extra field '{title}' has no selectable options"
                        ))
                    })?;
                items.push(json!({
                    "extraFieldItemValue": chosen.get("content").cloned().unwrap_or(Value::Null),
                    "extraFieldItemWid": chosen.get("wid").cloned().unwrap_or(Value::Null),
                }));
            }
            form["extraFieldItems"] = Value::Array(items);
        }

        Ok(form)
    }
}

#[async_trait]
impl ActionExecutor for AttendanceExecutor {
    fn name(&self) -> &'static str {
        "attendance"
    }

    async fn run(
        &self,
        session: &SessionHandle,
        user: &UserConfig,
    ) -> Result<String, ActionError> {
        let today = post_json(session, QUERY_PATH, json!({})).await?;

        let unsigned = today
            .get("unSignedTasks")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let Some(task) = unsigned.first() else {
            let signed = today
                .get("signedTasks")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            if signed > 0 {
                return Err(ActionError::already_done(
                    "today's attendance sign-in is already completed",
                ));
            }
            return Err(ActionError::nothing_to_do(
                "no attendance sign-in task is pending today",
            ));
        };

        let detail = post_json(
            session,
            DETAIL_PATH,
            json!({
                "signInstanceWid": task.get("signInstanceWid").cloned().unwrap_or(Value::Null),
                "signWid": task.get("signWid").cloned().unwrap_or(Value::Null),
            }),
        )
        .await?;

        let form = Self::fill_form(user, task, &detail)?;
        log::debug!("submitting attendance form for '{}'", user.username);
        post_json(session, SUBMIT_PATH, form).await?;

        let task_name = task
            .get("taskName")
            .and_then(Value::as_str)
            .unwrap_or("attendance");
        Ok(format!("attendance sign-in '{task_name}' submitted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn user() -> UserConfig {
        serde_yaml::from_str(
            r#"
username: "20260001"
password: "pw"
school_name: "Example University"
login_url: "https://portal.example.edu/authserver/login"
host: "https://portal.example.edu/"
type: 1
address: "1 Example Road"
lon: 120.15
lat: 30.28
"#,
        )
        .unwrap()
    }

    #[test]
    fn fill_form_answers_extra_fields_from_config() {
        let mut user = user();
        user.form_answers = HashMap::from([("Temperature".to_string(), "normal".to_string())]);
        let task = json!({"signInstanceWid": "w1", "signWid": "w2"});
        let detail = json!({
            "isNeedExtra": 1,
            "isMalposition": 0,
            "extraField": [{
                "title": "Temperature",
                "extraFieldItems": [
                    {"content": "feverish", "wid": "opt-1"},
                    {"content": "normal", "wid": "opt-2"},
                ],
            }],
        });

        let form = AttendanceExecutor::fill_form(&user, &task, &detail).unwrap();
        assert_eq!(form["position"], "1 Example Road");
        assert_eq!(form["extraFieldItems"][0]["extraFieldItemWid"], "opt-2");
    }

    #[test]
    fn fill_form_defaults_to_first_option() {
        let user = user();
        let task = json!({"signInstanceWid": "w1", "signWid": "w2"});
        let detail = json!({
            "isNeedExtra": 1,
            "extraField": [{
                "title": "Location",
                "extraFieldItems": [{"content": "on campus", "wid": "opt-9"}],
            }],
        });

        let form = AttendanceExecutor::fill_form(&user, &task, &detail).unwrap();
        assert_eq!(form["extraFieldItems"][0]["extraFieldItemValue"], "on campus");
    }

    #[test]
    fn fill_form_rejects_optionless_extra_fields() {
        let user = user();
        let task = json!({});
        let detail = json!({"isNeedExtra": 1, "extraField": [{"title": "Broken"}]});
        assert!(AttendanceExecutor::fill_form(&user, &task, &detail).is_err());
    }
}
