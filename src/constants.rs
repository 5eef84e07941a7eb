pub mod streams {

    pub const AGENT_EVENTS: &str = "vendra:agent-events";

    pub const BUSINESS_EVENTS: &str = "vendra:business-events";

    pub const ALL: &[&str] = &[AGENT_EVENTS, BUSINESS_EVENTS];
}

pub mod identity {

    /// Prefix for email-derived (permanent) user ids.
    pub const PERMANENT_PREFIX: &str = "u_";

    /// Prefix for random (temporary) user ids.
    pub const TEMPORARY_PREFIX: &str = "t_";

    /// Tenant partition key prefix, applied on top of the user id.
    pub const NAMESPACE_PREFIX: &str = "ns_";
}

pub mod signing {

    /// Domain-separation context for deriving the session-signing key
    /// from the master secret. Changing this invalidates every stored
    /// session signature.
    pub const SESSION_KEY_CONTEXT: &str = "vendra 2025-03-01 session record mac v1";
}

pub mod http {

    pub const DEFAULT_SESSION_COOKIE: &str = "vendra_session";

    pub const DEFAULT_CSRF_HEADER: &str = "x-csrf-token";
}

pub mod limits {

    pub const MAX_DEFINITION_ID_LEN: usize = 64;

    pub const MAX_TITLE_LEN: usize = 200;

    pub const MAX_DESCRIPTION_LEN: usize = 2000;
}
