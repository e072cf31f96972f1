/// Result of a core operation that may degrade instead of failing outright.
///
/// `Soft` failures are retried naturally by the next poll cycle; `Fatal`
/// failures stop the poll loop until an operator action re-arms it.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T, E> {
    Done(T),
    Soft(E),
    Fatal(E),
}
