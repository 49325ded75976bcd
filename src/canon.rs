//! Reduction of strided views to a minimal equivalent axis list.
//!
//! A canonical list has no unit-extent axes (unless the whole view is a single element), no
//! adjacent zero-stride axes, and no adjacent pair of axes whose strides compose contiguously.
//! Canonicalization never reorders axes and only ever shortens the list.

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CanonicalizeError {
    #[error("Got {sizes} sizes but {strides} strides")]
    LengthMismatch { sizes: usize, strides: usize },
    #[error("Cannot canonicalize an empty axis list")]
    Empty,
    #[error("Product of merged extents overflows")]
    Overflow,
}

/// Canonicalizes a single strided view.
///
/// Rules, applied in order:
/// 1. Unit-extent axes are dropped.
/// 2. Maximal runs of adjacent zero-stride axes are merged into one zero-stride axis. If rule 1
///    removed every axis, a single extent-1 axis carrying the last input stride is restored.
/// 3. Scanning from the last axis backward, axis `i` is merged into the group at `i + 1` while
///    `stride[i] == stride[i + 1] * extent[i + 1]`.
///
/// # Examples
/// ```
/// # use stridetile::canon::canonicalize;
/// let (sizes, strides) = canonicalize(&[4, 1, 8, 2], &[16, 99, 2, 1]).unwrap();
/// assert_eq!(sizes, vec![64]);
/// assert_eq!(strides, vec![1]);
/// ```
pub fn canonicalize(
    sizes: &[i64],
    strides: &[i64],
) -> Result<(Vec<i64>, Vec<i64>), CanonicalizeError> {
    let (sizes, mut strides) = canonicalize_views(sizes, &[strides])?;
    Ok((sizes, strides.pop().unwrap_or_default()))
}

/// Canonicalizes several views sharing one extent list.
///
/// The rules are those of [canonicalize], except that a merge only happens when every view
/// satisfies it. This keeps the logical axes of, e.g., a copy's source and destination paired
/// one-to-one. Returns one stride list per input view.
pub fn canonicalize_views(
    sizes: &[i64],
    views: &[&[i64]],
) -> Result<(Vec<i64>, Vec<Vec<i64>>), CanonicalizeError> {
    if sizes.is_empty() {
        return Err(CanonicalizeError::Empty);
    }
    if let Some(bad) = views.iter().find(|s| s.len() != sizes.len()) {
        return Err(CanonicalizeError::LengthMismatch {
            sizes: sizes.len(),
            strides: bad.len(),
        });
    }

    // Rule 1
    let mut axes: Vec<(i64, Vec<i64>)> = (0..sizes.len())
        .filter(|&i| sizes[i] != 1)
        .map(|i| (sizes[i], views.iter().map(|s| s[i]).collect()))
        .collect();

    // Rule 2
    if axes.is_empty() {
        let last = sizes.len() - 1;
        axes.push((1, views.iter().map(|s| s[last]).collect()));
    }
    let mut merged: Vec<(i64, Vec<i64>)> = Vec::with_capacity(axes.len());
    for (extent, strides) in axes {
        match merged.last_mut() {
            Some((prev_extent, prev_strides))
                if all_zero(prev_strides) && all_zero(&strides) =>
            {
                *prev_extent = prev_extent
                    .checked_mul(extent)
                    .ok_or(CanonicalizeError::Overflow)?;
            }
            _ => merged.push((extent, strides)),
        }
    }

    // Rule 3
    let mut groups: Vec<(i64, Vec<i64>)> = Vec::with_capacity(merged.len());
    for (extent, strides) in merged.into_iter().rev() {
        if let Some((group_extent, group_strides)) = groups.last_mut() {
            let contiguous = strides
                .iter()
                .zip(group_strides.iter())
                .all(|(&outer, &inner)| inner.checked_mul(*group_extent) == Some(outer));
            if contiguous {
                *group_extent = group_extent
                    .checked_mul(extent)
                    .ok_or(CanonicalizeError::Overflow)?;
                continue;
            }
        }
        groups.push((extent, strides));
    }
    groups.reverse();

    let out_sizes = groups.iter().map(|(e, _)| *e).collect();
    let out_strides = (0..views.len())
        .map(|v| groups.iter().map(|(_, s)| s[v]).collect())
        .collect();
    Ok((out_sizes, out_strides))
}

fn all_zero(strides: &[i64]) -> bool {
    strides.iter().all(|&s| s == 0)
}
