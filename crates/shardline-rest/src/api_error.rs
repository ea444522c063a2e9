//! API error bodies
//!
//! Failed requests carry `{"code": .., "message": ..}` in their body. The
//! code is stable and worth matching on; the message is for humans.

use serde_json::Value;

use crate::request::ResponseBody;

/// JSON error code returned by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Internal failure, also used when the body carries no code
    General,
    UnknownAccount,
    UnknownApplication,
    UnknownChannel,
    UnknownGuild,
    UnknownIntegration,
    UnknownInvite,
    UnknownMember,
    UnknownMessage,
    UnknownOverwrite,
    UnknownProvider,
    UnknownRole,
    UnknownToken,
    UnknownUser,
    UnknownEmoji,
    UnknownWebhook,
    MaxGuilds,
    MaxFriends,
    MaxPins,
    MaxRecipients,
    MaxRoles,
    MaxReactions,
    Unauthorized,
    MissingAccess,
    InvalidAccountType,
    InvalidDmAction,
    EmbedDisabled,
    CannotEditForeignMessage,
    EmptyMessage,
    CannotMessageUser,
    CannotMessageVoiceChannel,
    VerificationLevelTooHigh,
    OAuthWithoutBot,
    MaxOAuthApplications,
    InvalidOAuthState,
    MissingPermissions,
    InvalidToken,
    NoteTooLong,
    InvalidBulkDelete,
    InvalidMfaLevel,
    InvalidPassword,
    PinInOtherChannel,
    SystemMessageAction,
    BulkDeleteTooOld,
    MfaRequired,
    ReactionBlocked,
    /// A code this client does not know
    Unknown(u32),
}

const CODES: [(ErrorCode, u32); 46] = [
    (ErrorCode::General, 0),
    (ErrorCode::UnknownAccount, 10001),
    (ErrorCode::UnknownApplication, 10002),
    (ErrorCode::UnknownChannel, 10003),
    (ErrorCode::UnknownGuild, 10004),
    (ErrorCode::UnknownIntegration, 10005),
    (ErrorCode::UnknownInvite, 10006),
    (ErrorCode::UnknownMember, 10007),
    (ErrorCode::UnknownMessage, 10008),
    (ErrorCode::UnknownOverwrite, 10009),
    (ErrorCode::UnknownProvider, 10010),
    (ErrorCode::UnknownRole, 10011),
    (ErrorCode::UnknownToken, 10012),
    (ErrorCode::UnknownUser, 10013),
    (ErrorCode::UnknownEmoji, 10014),
    (ErrorCode::UnknownWebhook, 10015),
    (ErrorCode::MaxGuilds, 30001),
    (ErrorCode::MaxFriends, 30002),
    (ErrorCode::MaxPins, 30003),
    (ErrorCode::MaxRecipients, 30004),
    (ErrorCode::MaxRoles, 30005),
    (ErrorCode::MaxReactions, 30010),
    (ErrorCode::Unauthorized, 40001),
    (ErrorCode::MissingAccess, 50001),
    (ErrorCode::InvalidAccountType, 50002),
    (ErrorCode::InvalidDmAction, 50003),
    (ErrorCode::EmbedDisabled, 50004),
    (ErrorCode::CannotEditForeignMessage, 50005),
    (ErrorCode::EmptyMessage, 50006),
    (ErrorCode::CannotMessageUser, 50007),
    (ErrorCode::CannotMessageVoiceChannel, 50008),
    (ErrorCode::VerificationLevelTooHigh, 50009),
    (ErrorCode::OAuthWithoutBot, 50010),
    (ErrorCode::MaxOAuthApplications, 50011),
    (ErrorCode::InvalidOAuthState, 50012),
    (ErrorCode::MissingPermissions, 50013),
    (ErrorCode::InvalidToken, 50014),
    (ErrorCode::NoteTooLong, 50015),
    (ErrorCode::InvalidBulkDelete, 50016),
    (ErrorCode::InvalidMfaLevel, 50017),
    (ErrorCode::InvalidPassword, 50018),
    (ErrorCode::PinInOtherChannel, 50019),
    (ErrorCode::SystemMessageAction, 50021),
    (ErrorCode::BulkDeleteTooOld, 50034),
    (ErrorCode::MfaRequired, 60003),
    (ErrorCode::ReactionBlocked, 90001),
];

impl ErrorCode {
    pub fn from_code(code: u32) -> Self {
        CODES
            .iter()
            .find(|(_, known)| *known == code)
            .map_or(Self::Unknown(code), |(kind, _)| *kind)
    }

    /// Numeric code on the wire
    pub fn code(self) -> u32 {
        match self {
            Self::Unknown(code) => code,
            known => CODES
                .iter()
                .find(|(kind, _)| *kind == known)
                .map_or(0, |(_, code)| *code),
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "unknown error code {code}"),
            known => write!(f, "{known:?} ({})", known.code()),
        }
    }
}

/// Error body of a failed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorResponse {
    /// Parse a response body; `None` unless it is a JSON object with a
    /// `code` or `message`
    pub fn from_body(body: &ResponseBody) -> Option<Self> {
        let json = body.as_json()?.as_object()?;
        let code = json.get("code").and_then(Value::as_u64);
        let message = json.get("message").and_then(Value::as_str);
        if code.is_none() && message.is_none() {
            return None;
        }
        Some(Self {
            code: code
                .and_then(|c| u32::try_from(c).ok())
                .map_or(ErrorCode::General, ErrorCode::from_code),
            message: message.unwrap_or_default().to_string(),
        })
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
