//! # Response formatting
//! Renders analysis results into posts and splits citation lists into
//! numbered follow-ups. All lengths are counted in extended grapheme clusters,
//! which is how the platform counts its 300-character limit.

use unicode_segmentation::UnicodeSegmentation;

use crate::analysis::{AnalysisResult, InfoSummary, Verdict};

pub const MAX_POST_LENGTH: usize = 300;

const SOURCES_HEADER: &str = "Sources:\n";
const SOURCES_CONT_HEADER: &str = "Sources (cont.):\n";
const ELLIPSIS: &str = "…";

pub const FACTCHECK_APOLOGY: &str =
    "I apologize, but I encountered an error while fact-checking. Please try again later.";
pub const MOREINFO_APOLOGY: &str =
    "I apologize, but I encountered an error while looking that up. Please try again later.";

pub fn grapheme_len(s: &str) -> usize {
    s.graphemes(true).count()
}

pub fn verdict_glyph(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::True => "\u{2705}",
        Verdict::False => "\u{274C}",
        Verdict::Misleading => "\u{26A0}\u{FE0F}",
        Verdict::Unverified => "\u{2753}",
    }
}

/// Cut `text` to at most `cap` graphemes, preferring to end after the last
/// period, else at the last space, else at the raw cap.
pub fn truncate_to_boundary(text: &str, cap: usize) -> String {
    let text = text.trim();
    let Some((cut, _)) = text.grapheme_indices(true).nth(cap) else {
        return text.to_string();
    };
    let head = &text[..cut];
    let cutoff = match head.rfind('.') {
        Some(p) if p > 0 => p + 1,
        _ => match head.rfind(' ') {
            Some(p) if p > 0 => p,
            _ => head.len(),
        },
    };
    head[..cutoff].trim().to_string()
}

/// Clamp only `body`, so break points are never searched for inside `prefix`.
fn with_prefix(prefix: &str, body: &str) -> String {
    let room = MAX_POST_LENGTH.saturating_sub(grapheme_len(prefix));
    format!("{prefix}{}", truncate_to_boundary(body, room))
}

/// `{glyph} {Verdict}\n{explanation}`, kept within one post.
pub fn format_verdict(verdict: Verdict, explanation: &str) -> String {
    let prefix = format!("{} {}\n", verdict_glyph(verdict), verdict.as_str());
    with_prefix(&prefix, explanation.trim())
}

/// Main info first, then as many `• detail` lines as fit.
pub fn format_info(info: &InfoSummary) -> String {
    let mut post = with_prefix("\u{2139}\u{FE0F} ", info.main_info.trim());
    for detail in &info.details {
        let candidate = format!("{post}\n\u{2022} {}", detail.trim());
        if grapheme_len(&candidate) > MAX_POST_LENGTH {
            break;
        }
        post = candidate;
    }
    post
}

/// Numbered citation posts: `Sources:` then `Sources (cont.):` continuations.
/// Numbering runs across posts; an empty list yields no posts.
pub fn split_citations(citations: &[String]) -> Vec<String> {
    let mut posts = Vec::new();
    let mut buf = String::from(SOURCES_HEADER);
    let mut buf_len = grapheme_len(SOURCES_HEADER);
    let mut lines_in_buf = 0usize;

    for (i, citation) in citations.iter().enumerate() {
        let line = numbered_line(i + 1, citation.trim());
        let line_len = grapheme_len(&line);

        if lines_in_buf > 0 && buf_len + line_len > MAX_POST_LENGTH {
            posts.push(buf.trim().to_string());
            buf = String::from(SOURCES_CONT_HEADER);
            buf_len = grapheme_len(SOURCES_CONT_HEADER);
            lines_in_buf = 0;
        }

        let line = if buf_len + line_len > MAX_POST_LENGTH {
            clipped_line(i + 1, citation.trim(), MAX_POST_LENGTH.saturating_sub(buf_len))
        } else {
            line
        };
        buf_len += grapheme_len(&line);
        buf.push_str(&line);
        lines_in_buf += 1;
    }

    if lines_in_buf > 0 {
        posts.push(buf.trim().to_string());
    }
    posts
}

/// Every post of a reply chain: the verdict or info post, then citation posts.
pub fn render_thread(result: &AnalysisResult) -> Vec<String> {
    let head = match result {
        AnalysisResult::FactCheck(fc) => format_verdict(fc.verdict, &fc.explanation),
        AnalysisResult::Info(info) => format_info(info),
    };
    let mut posts = vec![head];
    posts.extend(split_citations(result.citations()));
    posts
}

fn numbered_line(n: usize, citation: &str) -> String {
    format!("{n}. {citation}\n")
}

/// A citation longer than a whole post, shortened so its line takes at most `room` graphemes.
fn clipped_line(n: usize, citation: &str, room: usize) -> String {
    let overhead = grapheme_len(&numbered_line(n, "")) + grapheme_len(ELLIPSIS);
    let head: String = citation
        .graphemes(true)
        .take(room.saturating_sub(overhead))
        .collect();
    numbered_line(n, &format!("{head}{ELLIPSIS}"))
}
