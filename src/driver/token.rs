use std::fmt;

const HALF: u32 = (std::mem::size_of::<usize>() * 8 / 2) as u32;
const LOW_MASK: usize = (1 << HALF) - 1;

/// Highest arena index a token can carry. The all-ones index is kept back so
/// that no live token ever equals [`NO_TOKEN`].
pub(crate) const MAX_INDEX: usize = LOW_MASK - 1;

/// Raw value standing for "no registration".
pub(crate) const NO_TOKEN: usize = usize::max_value();

/// Identifies a registration with the poller.
///
/// A `Token` is what the kernel hands back in the user-data field of each
/// event. It packs the arena index of the descriptor record into the low half
/// of a `usize` and the slot generation into the high half, so an event that
/// arrives after the record was recycled can be told apart from a live one.
///
/// # Examples
///
/// ```
/// use connstate::driver::Token;
///
/// let token = Token::new(7, 3);
///
/// assert_eq!(token.index(), 7);
/// assert_eq!(token.generation(), 3);
/// ```
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Token(pub usize);

impl Token {
    /// Builds a token from an arena index and a slot generation.
    ///
    /// Both halves are truncated to the width available on the target, so
    /// `index` must not exceed half the bits of a `usize`.
    #[inline]
    pub fn new(index: usize, generation: usize) -> Token {
        Token((index & LOW_MASK) | ((generation & LOW_MASK) << HALF))
    }

    /// Arena index of the descriptor record.
    #[inline]
    pub fn index(self) -> usize {
        self.0 & LOW_MASK
    }

    /// Slot generation captured at registration time.
    #[inline]
    pub fn generation(self) -> usize {
        self.0 >> HALF
    }
}

/// Wraps a generation counter into the width a token can carry.
#[inline]
pub(crate) fn wrap_generation(generation: usize) -> usize {
    generation & LOW_MASK
}

impl From<usize> for Token {
    fn from(val: usize) -> Token {
        Token(val)
    }
}

impl From<Token> for usize {
    fn from(val: Token) -> usize {
        val.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "Token({}@{})", self.index(), self.generation())
    }
}

#[test]
fn test_token_halves_do_not_overlap() {
    let token = Token::new(LOW_MASK, 1);
    assert_eq!(token.index(), LOW_MASK);
    assert_eq!(token.generation(), 1);

    let wrapped = Token::new(5, LOW_MASK + 2);
    assert_eq!(wrapped.index(), 5);
    assert_eq!(wrapped.generation(), 1);
    assert_eq!(wrap_generation(LOW_MASK + 1), 0);
}

#[test]
fn test_debug_token() {
    assert_eq!("Token(4@2)", format!("{:?}", Token::new(4, 2)));
}

#[test]
fn test_no_token_is_never_live() {
    assert_ne!(usize::from(Token::new(MAX_INDEX, LOW_MASK)), NO_TOKEN);
    assert_eq!(Token::new(MAX_INDEX, 0).index(), MAX_INDEX);
    assert_eq!(Token(NO_TOKEN).index(), MAX_INDEX + 1);
}
