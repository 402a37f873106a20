//! Subtitle auto-matching
//!
//! Picks the sibling subtitle whose name is closest to the video's name.

use strsim::levenshtein;

use crate::models::SubtitleCandidate;

/// Index of the candidate name with the smallest edit distance to `target`
///
/// Ties go to the earliest candidate. Returns `None` for an empty slice.
pub fn best_match_index<S: AsRef<str>>(target: &str, candidates: &[S]) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .map(|(i, name)| (i, levenshtein(target, name.as_ref())))
        .min_by_key(|&(_, distance)| distance)
        .map(|(i, _)| i)
}

/// Best subtitle for a video name
pub fn best_subtitle<'a>(
    video_name: &str,
    candidates: &'a [SubtitleCandidate],
) -> Option<&'a SubtitleCandidate> {
    let names: Vec<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
    best_match_index(video_name, &names).map(|i| &candidates[i])
}
