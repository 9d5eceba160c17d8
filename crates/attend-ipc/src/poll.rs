//! Conditional polling of attendance lists over the socket

use async_trait::async_trait;
use attend_api::{AttendanceRow, Command, ResponsePayload, ResponseResult};
use attend_feed::{FeedError, FeedResult, PollResponse, PollTransport};
use attend_util::SessionId;
use tokio::sync::Mutex;

use crate::IpcClient;

/// Resource name of a session's attendance list
pub fn attendance_resource(session_id: SessionId) -> String {
    format!("sessions/{}/attendance", session_id)
}

/// Inverse of [`attendance_resource`]
pub fn parse_attendance_resource(resource: &str) -> Option<SessionId> {
    let id = resource
        .trim_matches('/')
        .strip_prefix("sessions/")?
        .strip_suffix("/attendance")?;
    id.parse::<i64>().ok().map(SessionId::new)
}

/// Sends `list_attendance` with `if_none_match` through an [`IpcClient`]
pub struct IpcAttendanceTransport {
    client: Mutex<IpcClient>,
}

impl IpcAttendanceTransport {
    pub fn new(client: IpcClient) -> Self {
        Self {
            client: Mutex::new(client),
        }
    }
}

#[async_trait]
impl PollTransport for IpcAttendanceTransport {
    type Data = Vec<AttendanceRow>;

    async fn fetch(
        &self,
        resource: &str,
        change_token: Option<&str>,
    ) -> FeedResult<PollResponse<Vec<AttendanceRow>>> {
        let session_id = parse_attendance_resource(resource)
            .ok_or_else(|| FeedError::Decode(format!("unknown resource {}", resource)))?;

        let response = self
            .client
            .lock()
            .await
            .send(Command::ListAttendance {
                session_id,
                if_none_match: change_token.map(str::to_string),
            })
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        match response.result {
            ResponseResult::Ok(ResponsePayload::NotModified { .. }) => Ok(PollResponse::NotModified),
            ResponseResult::Ok(ResponsePayload::AttendanceList { rows, etag }) => {
                Ok(PollResponse::Modified {
                    data: rows,
                    change_token: Some(etag),
                })
            }
            ResponseResult::Ok(other) => Err(FeedError::Decode(format!(
                "unexpected payload {:?}",
                other
            ))),
            ResponseResult::Err(e) => Err(FeedError::Status(e.code.status())),
        }
    }
}
