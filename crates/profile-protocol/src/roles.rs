//! Server roles and the conversation status machine (§4.A, §4.C, §6).

/// Bitmask of roles a serving connection can be gated on. A port serves
/// exactly one role; `check()` intersects the request's required mask
/// against the role of the port the session was accepted on.
pub mod role {
    pub const PRIMARY: u32 = 1 << 0;
    pub const CL_CUSTOMER: u32 = 1 << 1;
    pub const CL_NON_CUSTOMER: u32 = 1 << 2;
    pub const CL_APP_SERVICE: u32 = 1 << 3;
    pub const SR_NEIGHBOR: u32 = 1 << 4;

    /// `Cl*` — any client-facing role (§4.C dispatch table shorthand).
    pub const CL_ANY: u32 = CL_CUSTOMER | CL_NON_CUSTOMER | CL_APP_SERVICE;
    pub const ANY: u32 = PRIMARY | CL_CUSTOMER | CL_NON_CUSTOMER | CL_APP_SERVICE | SR_NEIGHBOR;
}

/// Conversation status machine of §4.A. Ordering matters:
/// `Authenticated` satisfies a `Verified` requirement (§4.C), so the
/// derived `Ord` is used directly by [`satisfies`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub enum ConversationStatus {
    NoConversation,
    ConversationStarted,
    Verified,
    Authenticated,
}

/// A dispatch requirement on conversation status. `ConversationAny` is
/// satisfied by anything past `NoConversation`; `None` means the request
/// is a `SingleRequest` that carries no conversation precondition.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StatusRequirement {
    None,
    Exactly(ConversationStatus),
    ConversationAny,
}

impl StatusRequirement {
    pub fn satisfied_by(self, actual: ConversationStatus) -> bool {
        match self {
            StatusRequirement::None => true,
            StatusRequirement::ConversationAny => actual != ConversationStatus::NoConversation,
            StatusRequirement::Exactly(ConversationStatus::Verified) => {
                // Authenticated implies Verified (§4.C).
                actual == ConversationStatus::Verified || actual == ConversationStatus::Authenticated
            }
            StatusRequirement::Exactly(required) => actual == required,
        }
    }
}
