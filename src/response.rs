//! The handler return type: a tagged value the dispatcher turns into wire
//! bytes and a lifecycle decision, replacing string-kind dispatch.

/// What the session does with the socket once the dispatcher has emitted a
/// handler's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseAction {
    /// Close the socket after this response.
    Close,
    /// Read another framed request on the same socket.
    KeepAlive,
}

/// The value every route handler returns.
///
/// `Noop` means the handler already wrote raw bytes to the session itself
/// (sync and shell sub-protocols take the socket over entirely); the
/// dispatcher emits nothing further for it.
#[derive(Debug, Clone)]
pub enum Response {
    Ok {
        data: Option<Vec<u8>>,
        raw: bool,
        action: ResponseAction,
    },
    Fail {
        message: String,
        raw: bool,
        action: ResponseAction,
    },
    Noop {
        action: ResponseAction,
    },
}

impl Response {
    /// `OKAY` with no body, connection closes.
    pub fn ok() -> Self {
        Response::Ok {
            data: None,
            raw: false,
            action: ResponseAction::Close,
        }
    }

    /// `OKAY` with a length-prefixed body, connection closes.
    pub fn ok_with(data: impl Into<Vec<u8>>) -> Self {
        Response::Ok {
            data: Some(data.into()),
            raw: false,
            action: ResponseAction::Close,
        }
    }

    /// `OKAY` with a raw (non-length-prefixed) body, connection closes.
    pub fn ok_raw(data: impl Into<Vec<u8>>) -> Self {
        Response::Ok {
            data: Some(data.into()),
            raw: true,
            action: ResponseAction::Close,
        }
    }

    /// Keep the connection open for another framed request after this one.
    pub fn keep_alive(mut self) -> Self {
        match &mut self {
            Response::Ok { action, .. } => *action = ResponseAction::KeepAlive,
            Response::Fail { action, .. } => *action = ResponseAction::KeepAlive,
            Response::Noop { action } => *action = ResponseAction::KeepAlive,
        }
        self
    }

    /// `FAIL` with a length-prefixed UTF-8 reason, connection closes.
    pub fn fail(message: impl Into<String>) -> Self {
        Response::Fail {
            message: message.into(),
            raw: false,
            action: ResponseAction::Close,
        }
    }

    /// The handler already wrote bytes directly; emit nothing.
    pub fn noop() -> Self {
        Response::Noop {
            action: ResponseAction::Close,
        }
    }

    pub fn action(&self) -> ResponseAction {
        match self {
            Response::Ok { action, .. } => *action,
            Response::Fail { action, .. } => *action,
            Response::Noop { action } => *action,
        }
    }
}
