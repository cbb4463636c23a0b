////////////////////
// Buffer macros  //
////////////////////

/// Assertion that all slices have the same length.
///
/// Used on internal invariants (e.g. the column and value arrays of a sparse
/// graph) where a mismatch is a bug, not a user error.
#[macro_export]
macro_rules! assert_same_len {
    ($($vec:expr),+ $(,)?) => {
        {
            let lengths: Vec<usize> = vec![$($vec.len()),+];
            let first_len = lengths[0];

            if !lengths.iter().all(|&len| len == first_len) {
                panic!(
                    "Buffers have different lengths: {:?}",
                    lengths
                );
            }
        }
    };
}

/// Early-return a `TsneError::BufferSize` if a caller-provided buffer does
/// not have the expected length.
///
/// ### Params
///
/// * `$buf` - The buffer to check
/// * `$expected` - The expected length
/// * `$name` - Name of the buffer used in the error
#[macro_export]
macro_rules! ensure_len {
    ($buf:expr, $expected:expr, $name:expr) => {
        if $buf.len() != $expected {
            return Err($crate::error::TsneError::BufferSize {
                name: $name,
                expected: $expected,
                actual: $buf.len(),
            });
        }
    };
}
