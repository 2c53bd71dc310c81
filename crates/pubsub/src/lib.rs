// SPDX-License-Identifier: Apache-2.0
//! Push notifications: the STOMP session to the coordinator and the per-task
//! notification state machine.

mod dispatcher;
pub use dispatcher::NotificationDispatcher;
mod frame;
pub use frame::{StompCommand, StompFrame};
mod session;
pub use session::StompSession;
