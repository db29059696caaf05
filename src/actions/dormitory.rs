//! Dormitory check reporting executor.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{ActionError, ActionExecutor, post_json};
use crate::config::UserConfig;
use crate::session::SessionHandle;

const QUERY_PATH: &str = "wec-counselor-attendence-apps/student/attendence/getStuAttendacesInOneDay";
const DETAIL_PATH: &str = "wec-counselor-attendence-apps/student/attendence/detailAttendenceInstance";
const SUBMIT_PATH: &str = "wec-counselor-attendence-apps/student/attendence/submitAttendences";

pub struct DormCheckExecutor;

#[async_trait]
impl ActionExecutor for DormCheckExecutor {
    fn name(&self) -> &'static str {
        "dormitory check"
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
                    "today's dormitory check is already reported",
                ));
            }
            return Err(ActionError::nothing_to_do(
                "no dormitory check is pending today",
            ));
        };

        let instance_wid = task.get("signInstanceWid").cloned().unwrap_or(Value::Null);
        let sign_wid = task.get("signWid").cloned().unwrap_or(Value::Null);

        let detail = post_json(
            session,
            DETAIL_PATH,
            json!({ "signInstanceWid": instance_wid.clone(), "signWid": sign_wid.clone() }),
        )
        .await?;

        let form = json!({
            "signInstanceWid": instance_wid,
            "signWid": sign_wid,
            "longitude": user.lon,
            "latitude": user.lat,
            "isMalposition": detail.get("isMalposition").cloned().unwrap_or(json!(1)),
            "position": user.address.clone().unwrap_or_default(),
            "abnormalReason": user.abnormal_reason.clone().unwrap_or_default(),
            "signPhotoUrl": "",
            "uaIsCpadaily": true,
        });
        log::debug!("submitting dormitory check for '{}'", user.username);
        post_json(session, SUBMIT_PATH, form).await?;

        let task_name = task
            .get("taskName")
            .and_then(Value::as_str)
            .unwrap_or("dormitory check");
        Ok(format!("dormitory check '{task_name}' submitted"))
    }
}
