//! Runtime type recovery for erased mailbox references
//!
//! A mailbox handle that crosses a serialization or registry boundary loses
//! its payload type parameter. [`TypedHandle`] carries the runtime type tag
//! alongside the erased reference and lets a caller assert, and recover,
//! the expected type, failing fast with
//! [`MailboxError::TypeMismatch`] on a wrong assertion. It is a defensive
//! runtime check, never used for dispatch.

use super::traits::{Mailbox, MailboxError, Message, Result};
use std::any::{self, Any};
use std::sync::Arc;

/// A type-erased mailbox reference tagged with the payload type it conveys.
#[derive(Clone)]
pub struct TypedHandle {
    /// The erased `Arc<dyn Mailbox<M>>`
    mailbox: Arc<dyn Any + Send + Sync>,
    /// The payload type the mailbox actually carries
    carried: &'static str,
    /// Whether the mailbox declared a type tag at construction
    declared: bool,
}

impl TypedHandle {
    /// Erase `mailbox`, remembering its payload type.
    pub fn new<M: Message>(mailbox: Arc<dyn Mailbox<M>>) -> Self {
        let declared = mailbox.message_type().is_some();
        Self {
            mailbox: Arc::new(mailbox),
            carried: any::type_name::<M>(),
            declared,
        }
    }

    /// The declared payload type tag, if the underlying mailbox carries one.
    pub fn message_type(&self) -> Option<&'static str> {
        self.declared.then_some(self.carried)
    }

    /// Recover the mailbox, asserting that it conveys messages of type `T`.
    ///
    /// # Errors
    /// Fails with [`MailboxError::TypeMismatch`] when the mailbox carries a
    /// different payload type.
    pub fn check_type<T: Message>(&self) -> Result<Arc<dyn Mailbox<T>>> {
        match self.mailbox.downcast_ref::<Arc<dyn Mailbox<T>>>() {
            Some(mailbox) => Ok(mailbox.clone()),
            None => Err(MailboxError::TypeMismatch {
                carried: self.carried,
                requested: any::type_name::<T>(),
            }),
        }
    }
}

impl std::fmt::Debug for TypedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedHandle")
            .field("carried", &self.carried)
            .field("declared", &self.declared)
            .finish()
    }
}
