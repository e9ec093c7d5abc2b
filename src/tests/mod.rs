//! End-to-end tests driving the full router against an in-memory database
//! and the scripted test provider.
