//! Identity service models

pub mod device;
pub mod otp;
pub mod principal;
pub mod role;
pub mod token;

// Re-export for convenience
pub use device::{
    ActivityType, DeviceSession, LinkSession, LinkSessionWrite, NewDeviceSession, RequestMetadata,
};
pub use otp::{Contact, NewOtp, Otp, OtpPurpose, OtpSubject, RecordStatus};
pub use principal::{Account, AccountStatus, NewAccount, Principal, PrincipalKind};
pub use role::{Grant, Permission, Role, RoleRule, RoleSectionPermission, Section};
pub use token::{NewToken, Token, TokenKind, TokenSide};
