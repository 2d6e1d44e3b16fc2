use serde::{Deserialize, Serialize};

/// Response for `GET /api/file/{id}`
#[derive(Serialize, Deserialize, Debug)]
pub struct FileContentResponse {
    pub fileid: String,
    pub content: String,
    pub filename: String,
    pub roomexists: bool,
    pub language: String,
}

/// Body of `PUT /api/file/{id}`
#[derive(Serialize, Deserialize, Debug)]
pub struct SaveFileRequest {
    pub content: String,
}

/// Response for a confirmed save
#[derive(Serialize, Deserialize, Debug)]
pub struct SaveFileResponse {
    pub message: String,
}

/// Response for `POST /api/session`
#[derive(Serialize, Deserialize, Debug)]
pub struct SessionCreateResponse {
    pub sessionid: String,
    pub editurl: String,
}
