mod email;
mod notifier;

pub use email::{DispatchReceipt, EmailDispatcher, HttpEmailDispatcher};
pub use notifier::{LogNotifier, Notifier, Severity, SlackNotifier};

#[cfg(test)]
pub mod testing {
    pub use super::email::testing::FakeEmail;
    pub use super::notifier::testing::RecordingNotifier;
}
