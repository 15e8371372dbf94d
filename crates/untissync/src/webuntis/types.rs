/// Wire types for the WebUntis JSON-RPC API
use serde::{Deserialize, Serialize};

/// Element type WebUntis uses for rooms in timetable queries.
pub const ELEMENT_TYPE_ROOM: u8 = 4;

#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a, P: Serialize> {
    pub id: String,
    pub method: &'a str,
    pub params: P,
    pub jsonrpc: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthParams<'a> {
    pub user: &'a str,
    pub password: &'a str,
    pub client: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResult {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// School year as returned by `getCurrentSchoolyear`.
///
/// Dates are `yyyymmdd` integers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schoolyear {
    pub id: i64,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "startDate")]
    pub start_date: u32,

    #[serde(rename = "endDate")]
    pub end_date: u32,
}

/// One day of the school's time grid (`getTimegridUnits`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimegridDay {
    /// 1 = Sunday, 2 = Monday, ..., 7 = Saturday
    pub day: u8,

    #[serde(rename = "timeUnits", default)]
    pub time_units: Vec<TimeUnit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeUnit {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "startTime")]
    pub start_time: u32,

    #[serde(rename = "endTime")]
    pub end_time: u32,
}

/// Class as returned by `getKlassen`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Klasse {
    pub id: i64,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "longName", default)]
    pub long_name: String,
}

/// Room as returned by `getRooms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: i64,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "longName", default)]
    pub long_name: String,

    #[serde(default)]
    pub building: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimetableParams {
    pub options: TimetableOptions,
}

/// Options of the customizable `getTimetable` call.
#[derive(Debug, Clone, Serialize)]
pub struct TimetableOptions {
    pub element: TimetableElementRef,

    #[serde(rename = "startDate")]
    pub start_date: u32,

    #[serde(rename = "endDate")]
    pub end_date: u32,

    #[serde(rename = "onlyBaseTimetable")]
    pub only_base_timetable: bool,

    #[serde(rename = "klasseFields")]
    pub klasse_fields: Vec<&'static str>,

    #[serde(rename = "subjectFields")]
    pub subject_fields: Vec<&'static str>,

    #[serde(rename = "teacherFields")]
    pub teacher_fields: Vec<&'static str>,

    #[serde(rename = "roomFields")]
    pub room_fields: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimetableElementRef {
    pub id: i64,
    #[serde(rename = "type")]
    pub element_type: u8,
}

/// A class/teacher/subject/room reference inside a timetable period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementRef {
    pub id: i64,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub longname: Option<String>,
}

impl ElementRef {
    /// The long name, or an empty string if the field was not requested.
    pub fn long_name(&self) -> &str {
        self.longname.as_deref().unwrap_or_default()
    }
}

/// One lesson occurrence of a timetable.
///
/// `date` is `yyyymmdd`, `start_time`/`end_time` are `hhmm`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimetablePeriod {
    #[serde(default)]
    pub id: i64,

    pub date: u32,

    #[serde(rename = "startTime")]
    pub start_time: u32,

    #[serde(rename = "endTime")]
    pub end_time: u32,

    #[serde(default)]
    pub kl: Vec<ElementRef>,

    #[serde(default)]
    pub te: Vec<ElementRef>,

    #[serde(default)]
    pub su: Vec<ElementRef>,

    #[serde(default)]
    pub ro: Vec<ElementRef>,
}
