//! Domain entities - the objects the entity builder produces

mod guild;
mod member;
mod user;

pub use guild::Guild;
pub use member::GuildMember;
pub use user::User;
