use proc_macro::TokenStream;

mod timeout_impl;

/// Bounds the running time of a blocking function.
///
/// The body runs on a helper thread while the caller waits with a deadline.
/// Panics raised by the body are resumed on the calling thread.
///
/// The duration is either a string literal with a unit suffix or any
/// `std::time::Duration` expression.
///
/// | Suffix | Equivalent to                      |
/// |--------|----------------------------------- |
/// | `ms`   | `Duration::from_millis(n)`         |
/// | `s`    | `Duration::from_secs(n)`           |
///
/// # Behavior
///
/// - If the function returns `Result<T, E>`, a timeout returns `Err` with
///   [`TimeoutError`](altlive::utils::timer::TimeoutError) converted via `Into::into`.
/// - Otherwise a timeout panics, which fails the surrounding test.
///
/// # Examples
///
/// ```ignore
/// #[test]
/// #[altlive::timeout("1s")]
/// fn posts_are_delivered() {
///     // ...
/// }
/// ```
#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    match timeout_impl::timeout(attr.into(), item.into()) {
        Ok(s) => s,
        Err(e) => e.to_compile_error(),
    }
    .into()
}
