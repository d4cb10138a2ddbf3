pub mod guild;
pub mod verification;

pub use guild::{
    BotUser, Guild, GuildOutcome, GuildReport, Member, ProvisionReport, Role, RoleSpec,
    PERMISSION_MANAGE_GUILD, PERMISSION_SEND_MESSAGES, PERMISSION_VIEW_CHANNEL,
    VERIFIED_ROLE_COLOR,
};
pub use verification::{
    ClientInfo, Connection, GeoRecord, IdentityCredential, Profile, VerificationRecord,
    VerificationRequest,
};
