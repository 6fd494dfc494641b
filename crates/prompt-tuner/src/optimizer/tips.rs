use rand::Rng;
use rand::seq::SliceRandom;

/// Library of general prompt-engineering advice.
///
/// Random restructuring appends these as extra instructions, and COPRO hands
/// one to the prompt model with each variation request to spread the
/// proposals out.
#[derive(Clone, Debug, PartialEq)]
pub struct PromptingTips {
    pub tips: Vec<String>,
}

impl PromptingTips {
    pub fn default_tips() -> Self {
        Self {
            tips: [
                "Use clear and specific language.",
                "Specify the desired output format.",
                "Answer as concisely as possible.",
                "Think through the problem step by step before answering.",
                "Follow the pattern shown in the examples.",
                "State any assumptions you make.",
                "Be explicit about what to avoid or exclude.",
                "Double-check the answer before responding.",
                "Do not add information that is not supported by the input.",
                "Respond with only the final answer.",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }

    pub fn format_for_prompt(&self) -> String {
        self.tips
            .iter()
            .enumerate()
            .map(|(i, tip)| format!("{}. {}", i + 1, tip))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Cycles through the library; `None` only when it is empty.
    pub fn get(&self, index: usize) -> Option<&str> {
        if self.tips.is_empty() {
            return None;
        }
        Some(self.tips[index % self.tips.len()].as_str())
    }

    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
        self.tips.choose(rng).map(String::as_str)
    }
}

impl Default for PromptingTips {
    fn default() -> Self {
        Self::default_tips()
    }
}
