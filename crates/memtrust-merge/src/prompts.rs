//! Prompt templates, one per consolidation strategy.
//!
//! Each template lists the source texts in group order, numbered from 1.

use memtrust_core::MemoryWithScore;

pub fn redundancy(memories: &[MemoryWithScore]) -> String {
    let mut prompt = String::from(
        "You are a memory consolidation assistant. The memory entries below are \
         redundant and say largely the same thing. Merge them into one concise \
         memory that keeps every important detail.\n\nRedundant Memories:\n",
    );
    push_numbered(&mut prompt, memories, |_| None);
    prompt.push_str(
        "\nInstructions:\n\
         - Merge the information into one clear, concise statement\n\
         - Preserve all important details\n\
         - Remove repetition\n\
         - Keep the original tone and style\n\
         - Output only the merged memory, without explanation\n\n\
         Merged Memory:",
    );
    prompt
}

pub fn conflict_resolution(memories: &[MemoryWithScore]) -> String {
    let mut prompt = String::from(
        "You are a memory conflict resolution assistant. The memory entries below \
         contain conflicting information. Analyze them and produce a single, \
         accurate memory.\n\nConflicting Memories:\n",
    );
    push_numbered(&mut prompt, memories, |m| {
        Some(match m.confidence() {
            Some(c) => format!("{c:.2}"),
            None => "unknown".to_string(),
        })
    });
    prompt.push_str(
        "\nInstructions:\n\
         - Analyze the conflicts carefully\n\
         - Prefer information from higher-confidence sources\n\
         - Where statements stay contradictory, state the uncertainty\n\
         - Give a balanced, objective statement\n\
         - Output only the resolved memory, without explanation\n\n\
         Resolved Memory:",
    );
    prompt
}

pub fn summarization(memories: &[MemoryWithScore]) -> String {
    let mut prompt = String::from(
        "You are a memory summarization assistant. Write a concise summary of the \
         related memories below.\n\nMemories to Summarize:\n",
    );
    push_numbered(&mut prompt, memories, |_| None);
    prompt.push_str(
        "\nInstructions:\n\
         - Write a brief but comprehensive summary\n\
         - Capture the key information from every memory\n\
         - Stay factually accurate\n\
         - Output only the summary, without explanation\n\n\
         Summary:",
    );
    prompt
}

fn push_numbered<F>(prompt: &mut String, memories: &[MemoryWithScore], confidence: F)
where
    F: Fn(&MemoryWithScore) -> Option<String>,
{
    for (i, m) in memories.iter().enumerate() {
        let line = match confidence(m) {
            Some(c) => format!("{}. {} (Confidence: {c})\n", i + 1, m.text),
            None => format!("{}. {}\n", i + 1, m.text),
        };
        prompt.push_str(&line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memtrust_core::{Provenance, SourceType};

    #[test]
    fn test_redundancy_prompt_lists_every_memory() {
        let memories = vec![
            MemoryWithScore::new("a", "likes tea", 1.0),
            MemoryWithScore::new("b", "enjoys tea", 0.9),
        ];
        let prompt = redundancy(&memories);
        assert!(prompt.contains("Redundant Memories:\n1. likes tea\n2. enjoys tea\n"));
        assert!(prompt.ends_with("Merged Memory:"));
    }

    #[test]
    fn test_conflict_prompt_includes_confidence() {
        let memories = vec![
            MemoryWithScore::new("a", "office is on floor 3", 1.0)
                .with_provenance(Provenance::new(SourceType::UserInput, "u")),
            MemoryWithScore::new("b", "actually the office is on floor 4", 0.8),
        ];
        let prompt = conflict_resolution(&memories);
        assert!(prompt.contains("1. office is on floor 3 (Confidence: 0.70)"));
        assert!(prompt.contains("2. actually the office is on floor 4 (Confidence: unknown)"));
    }

    #[test]
    fn test_summarization_prompt_header() {
        let prompt = summarization(&[MemoryWithScore::new("a", "x", 1.0)]);
        assert!(prompt.contains("Memories to Summarize:\n1. x\n"));
        assert!(prompt.ends_with("Summary:"));
    }
}
