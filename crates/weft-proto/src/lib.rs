mod frame;

pub use frame::{AuthRequest, AuthResponse, CallOutcome, CallRequest, Frame, FN_NOT_EXIST};
