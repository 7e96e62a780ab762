//! Out-of-band delivery of issued images.
//!
//! Delivery runs after the registry write. A failure here is reported to the
//! caller; the token stays valid and delivery can be retried with the same
//! [`IssuedToken`].

pub mod outbox;
pub mod smtp;

pub use outbox::OutboxDelivery;
pub use smtp::SmtpDelivery;

use crate::token::IssuedToken;

pub trait DeliveryChannel: Send + Sync {
    /// Human-readable channel name for logs.
    fn name(&self) -> &str;

    /// Hand `issued.png` to `issued.identity`. Blocking.
    fn deliver(&self, issued: &IssuedToken) -> anyhow::Result<()>;
}

/// Text accompanying every delivered image.
pub const DELIVERY_BODY: &str = "Your authentication image is attached.\n\
Please keep this image safe as it will be required for login.\n\
If you lose this image, you can request a new one through the reset system.";
