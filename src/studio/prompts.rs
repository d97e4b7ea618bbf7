//! Prompt files and prompt enrichment.

use serde::Serialize;

use crate::errors::PromptError;

/// An ordered, non-empty list of prompts. Order defines processing order
/// and record indices for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptSet {
    prompts: Vec<String>,
}

impl PromptSet {
    /// Parse uploaded text: one prompt per line, trimmed, blank lines dropped.
    pub fn parse(text: &str) -> Result<Self, PromptError> {
        let prompts: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self::from_prompts(prompts)
    }

    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, PromptError> {
        let text = std::str::from_utf8(bytes).map_err(|_| PromptError::NotUtf8)?;
        Self::parse(text.trim_start_matches('\u{feff}'))
    }

    /// Build from already-split prompts, dropping blank entries.
    pub fn from_prompts<I, S>(prompts: I) -> Result<Self, PromptError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prompts: Vec<String> = prompts
            .into_iter()
            .map(Into::into)
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if prompts.is_empty() {
            return Err(PromptError::Empty);
        }
        Ok(Self { prompts })
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.prompts.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.prompts
    }

    /// The first `n` prompts, for upload confirmations.
    pub fn preview(&self, n: usize) -> &[String] {
        &self.prompts[..n.min(self.prompts.len())]
    }
}

/// Expand a short user description into a detailed video prompt.
pub fn optimize_prompt(description: &str) -> Result<String, PromptError> {
    let description = description.trim();
    if description.is_empty() {
        return Err(PromptError::EmptyDescription);
    }
    Ok(format!(
        "A cinematic video of {} with professional lighting, smooth camera movements, \
         high detail, 4K quality, dynamic composition",
        description
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_parse_drops_blank_lines_and_trims() {
        let set = PromptSet::parse("  a cat on a beach \n\n\t\na dog in snow\r\n   \n").unwrap();
        assert_eq!(set.as_slice(), &["a cat on a beach", "a dog in snow"]);
        assert_eq!(set.len(), 2);
        assert!(!set.is_empty());
    }

    #[test]
    fn test_parse_preserves_order() {
        let set = PromptSet::parse("third\nfirst\nsecond").unwrap();
        let prompts: Vec<&str> = set.iter().collect();
        assert_eq!(prompts, vec!["third", "first", "second"]);
    }

    #[test]
    fn test_parse_empty_is_error() {
        assert_eq!(PromptSet::parse(""), Err(PromptError::Empty));
        assert_eq!(PromptError::Empty.kind(), ErrorKind::InvalidInput);
        assert_eq!(
            PromptSet::from_prompts(Vec::<String>::new()),
            Err(PromptError::Empty)
        );
        assert_eq!(PromptSet::parse("\n  \n\t"), Err(PromptError::Empty));
    }

    #[test]
    fn test_parse_bytes_rejects_invalid_utf8() {
        assert_eq!(PromptSet::parse_bytes(&[0xff, 0xfe, 0x00]), Err(PromptError::NotUtf8));
    }

    #[test]
    fn test_parse_bytes_strips_bom() {
        let set = PromptSet::parse_bytes("\u{feff}sunrise over hills\n".as_bytes()).unwrap();
        assert_eq!(set.as_slice(), &["sunrise over hills"]);
    }

    #[test]
    fn test_preview_caps_at_len() {
        let set = PromptSet::from_prompts(["a", "b", "c"]).unwrap();
        assert_eq!(set.preview(5).len(), 3);
        assert_eq!(set.preview(2), &["a", "b"]);
    }

    #[test]
    fn test_from_prompts_filters_blank() {
        let set = PromptSet::from_prompts(vec![" ", "x", ""]).unwrap();
        assert_eq!(set.len(), 1);
        assert!(PromptSet::from_prompts(Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_optimize_prompt() {
        let prompt = optimize_prompt("  a fox in autumn ").unwrap();
        assert!(prompt.starts_with("A cinematic video of a fox in autumn with"));
        assert!(prompt.contains("professional lighting"));
        assert_eq!(optimize_prompt("   "), Err(PromptError::EmptyDescription));
    }
}
