//! Helpers over slash-separated tree keys ("/Docs/A.txt"). Empty segments
//! are ignored, so "/Docs//A.txt/" and "Docs/A.txt" address the same node.

pub fn segments(path: &str) -> impl DoubleEndedIterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

/// Number of non-empty segments; the root is depth 0.
pub fn depth(path: &str) -> usize {
    segments(path).count()
}

/// Depth of the longest segment-wise prefix shared by both paths.
pub fn common_prefix_depth(left: &str, right: &str) -> usize {
    segments(left)
        .zip(segments(right))
        .take_while(|(a, b)| a == b)
        .count()
}

pub fn base_name(path: &str) -> &str {
    segments(path).next_back().unwrap_or("")
}
