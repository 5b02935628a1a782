//! Device profile and per-report field filtering.

use crate::registry::SystemProfileField;
use crate::wire::SystemProfile;

/// The device's full system profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemData {
    profile: SystemProfile,
}

impl SystemData {
    pub fn new(profile: SystemProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &SystemProfile {
        &self.profile
    }

    /// Copy of the profile keeping only `fields`; everything else is cleared.
    pub fn filtered_profile(&self, fields: &[SystemProfileField]) -> SystemProfile {
        let mut filtered = SystemProfile::default();
        for field in fields {
            match field {
                SystemProfileField::Os => filtered.os.clone_from(&self.profile.os),
                SystemProfileField::Arch => filtered.arch.clone_from(&self.profile.arch),
                SystemProfileField::BoardName => {
                    filtered.board_name.clone_from(&self.profile.board_name)
                }
                SystemProfileField::ProductName => {
                    filtered.product_name.clone_from(&self.profile.product_name)
                }
                SystemProfileField::SystemVersion => {
                    filtered.system_version.clone_from(&self.profile.system_version)
                }
                SystemProfileField::AppVersion => {
                    filtered.app_version.clone_from(&self.profile.app_version)
                }
                SystemProfileField::Channel => filtered.channel.clone_from(&self.profile.channel),
            }
        }
        filtered
    }
}
