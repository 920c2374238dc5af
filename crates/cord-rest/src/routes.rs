//! Route templates for common endpoints
//!
//! Use with [`RestRouter::request_route`](crate::RestRouter::request_route):
//!
//! ```ignore
//! router
//!     .request_route(Method::Post, routes::CHANNEL_MESSAGES, &[channel_id], options)
//!     .await?;
//! ```

pub const GATEWAY: &str = "gateway";
pub const GATEWAY_BOT: &str = "gateway/bot";

pub const CURRENT_USER: &str = "users/@me";
pub const CURRENT_USER_GUILDS: &str = "users/@me/guilds";
pub const USER: &str = "users/{user_id}";

pub const CHANNEL: &str = "channels/{channel_id}";
pub const CHANNEL_MESSAGES: &str = "channels/{channel_id}/messages";
pub const CHANNEL_MESSAGE: &str = "channels/{channel_id}/messages/{message_id}";
pub const CHANNEL_BULK_DELETE: &str = "channels/{channel_id}/messages/bulk-delete";
pub const CHANNEL_TYPING: &str = "channels/{channel_id}/typing";
pub const CHANNEL_PINS: &str = "channels/{channel_id}/pins";
pub const MESSAGE_REACTIONS: &str = "channels/{channel_id}/messages/{message_id}/reactions";
pub const MESSAGE_REACTION: &str =
    "channels/{channel_id}/messages/{message_id}/reactions/{emoji}";
pub const OWN_REACTION: &str = "channels/{channel_id}/messages/{message_id}/reactions/{emoji}/@me";

pub const GUILD: &str = "guilds/{guild_id}";
pub const GUILD_CHANNELS: &str = "guilds/{guild_id}/channels";
pub const GUILD_MEMBERS: &str = "guilds/{guild_id}/members";
pub const GUILD_MEMBER: &str = "guilds/{guild_id}/members/{user_id}";
pub const GUILD_MEMBER_ROLE: &str = "guilds/{guild_id}/members/{user_id}/roles/{role_id}";
pub const GUILD_ROLES: &str = "guilds/{guild_id}/roles";
pub const GUILD_BANS: &str = "guilds/{guild_id}/bans";
pub const GUILD_BAN: &str = "guilds/{guild_id}/bans/{user_id}";

pub const WEBHOOK: &str = "webhooks/{webhook_id}";
pub const WEBHOOK_WITH_TOKEN: &str = "webhooks/{webhook_id}/{webhook_token}";
