pub use alerting::{AlertContact, AlertRule, ChannelConfig, Integration, WorkspaceMember};
pub use check::{Check, CheckResult, CheckStatus};
pub use incident::{Incident, IncidentStatus, IncidentUpdate, Severity};
pub use maintenance::MaintenanceWindow;
pub use monitor::{KeywordMode, Monitor, MonitorConfig, MonitorStatus, MonitorType, StatusRange};

/// Region tag stamped on checks that arrive through the push endpoints.
pub const PUSH_REGION: &str = "push";

/// Plain-string enums stored as TEXT columns and exchanged as JSON strings.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::Error;

            fn from_str(s: &str) -> crate::Result<Self> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(crate::Error::validation(format!(
                        "invalid {}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

pub(crate) use text_enum;

mod alerting;
mod check;
mod incident;
mod maintenance;
mod monitor;
