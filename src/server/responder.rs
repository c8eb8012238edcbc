//! Response generation for received payloads.

use std::borrow::Cow;

/// Maps a received payload to the bytes sent back.
///
/// The send path truncates whatever is returned to the outbound capacity.
pub trait Responder {
    fn respond<'a>(&mut self, request: &'a [u8]) -> Cow<'a, [u8]>;
}

/// Sends every payload back unchanged, with no framing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl Responder for Echo {
    fn respond<'a>(&mut self, request: &'a [u8]) -> Cow<'a, [u8]> {
        Cow::Borrowed(request)
    }
}

impl<F> Responder for F
where
    F: FnMut(&[u8]) -> Vec<u8>,
{
    fn respond<'a>(&mut self, request: &'a [u8]) -> Cow<'a, [u8]> {
        Cow::Owned(self(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_borrows() {
        let mut echo = Echo;
        let out = echo.respond(b"ping");
        assert_eq!(&*out, b"ping");
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn test_closure_responder() {
        let mut upper = |req: &[u8]| req.to_ascii_uppercase();
        assert_eq!(&*upper.respond(b"ping"), b"PING");
    }
}
