/// Compile a regex literal once and hand back a `&'static Regex`.
///
/// Patterns are literals written in this crate, so a failed compile is a
/// programming error caught by the first test that touches it.
#[macro_export]
macro_rules! regex {
    ($pat:literal) => {{
        static RE: once_cell::sync::Lazy<regex::Regex> =
            once_cell::sync::Lazy::new(|| regex::Regex::new($pat).expect("invalid built-in regex"));
        &*RE
    }};
}
