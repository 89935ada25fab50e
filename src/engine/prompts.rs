//! Phase-aware prompt composition for structured meetings.
//!
//! Every function here is deterministic: identical inputs produce identical
//! strings, so tests pin on exact substrings. Provides:
//! - Predefined rule sets (`CODING_RULES`, `REPORT_RULES`, `PAPER_RULES`,
//!   `CONCISENESS_RULE`) and per-output-type defaults
//! - Meeting start / previous-context prompts
//! - Team Lead phase prompts (initial, synthesis, final)
//! - Team Member, Critic, and Integrator prompts
//! - Individual, merge, and rewrite meeting prompts
//! - Output structure templates by output type
//! - Phase temperature schedule

use crate::models::{Agent, OutputType};

use super::context::ContextSummary;

/// Prefix for user messages authored by a human (not an agent) so models
/// treat them as high-priority input when re-inserted into the transcript.
pub const HUMAN_FEEDBACK_PREFIX: &str = "**Human feedback:** ";

/// Universal rule appended to every default rule set.
pub const CONCISENESS_RULE: &str =
    "Be concise: make every point once, avoid restating earlier contributions, and prefer short paragraphs or bullet lists.";

/// Default rules for code meetings.
pub const CODING_RULES: [&str; 6] = [
    "Write complete, runnable code: no placeholders, no pseudocode, no '...' elisions.",
    "Every code file must be self-contained and include all imports it needs.",
    "Prefer the standard library of the target language; justify every third-party dependency.",
    "Include docstrings or comments for non-obvious functions and document all parameters.",
    "Handle errors explicitly; do not swallow exceptions or ignore failure cases.",
    "When producing multiple files, give each a full relative path with extension.",
];

/// Default rules for report meetings.
pub const REPORT_RULES: [&str; 3] = [
    "Support every claim with evidence discussed in the meeting.",
    "Separate observations from recommendations.",
    "State uncertainty explicitly where the team did not reach agreement.",
];

/// Default rules for paper meetings.
pub const PAPER_RULES: [&str; 3] = [
    "Use formal academic register and cite prior work where relevant.",
    "Make the contribution statement explicit in the abstract.",
    "Report methods in enough detail to be reproducible.",
];

/// Instruction appended to coding agents' system prompts in code meetings:
/// code must be emitted as a JSON manifest so the artifact extractor can
/// parse it deterministically.
const CODE_MANIFEST_INSTRUCTION: &str = "\n\nWhen you produce code, output it as a JSON array of file objects, \
optionally wrapped in a fenced code block:\n\
[{\"path\": \"relative/path/with.ext\", \"language\": \"python\", \"code\": \"...\"}]\n\
Every entry must have a complete relative path including the file extension.";

/// Instruction for non-coding agents in code meetings.
const NO_CODE_INSTRUCTION: &str = "\n\nDo not write code yourself. Contribute your domain expertise in prose and \
leave implementation to the agents responsible for code.";

/// Default rules for the given output type. Always contains
/// [`CONCISENESS_RULE`]; unknown types get only the universal rule.
pub fn default_rules(output_type: OutputType) -> Vec<String> {
    let mut rules: Vec<String> = match output_type {
        OutputType::Code => CODING_RULES.iter().map(|r| r.to_string()).collect(),
        OutputType::Report => REPORT_RULES.iter().map(|r| r.to_string()).collect(),
        OutputType::Paper => PAPER_RULES.iter().map(|r| r.to_string()).collect(),
    };
    rules.push(CONCISENESS_RULE.to_string());
    rules
}

/// Base persona prompt derived from an agent's profile fields. Stored on the
/// agent and regenerated whenever a source field changes.
pub fn agent_system_prompt(
    name: &str,
    title: &str,
    expertise: &str,
    goal: &str,
    role: &str,
) -> String {
    let mut out = format!("You are {name}");
    if !title.is_empty() {
        out.push_str(&format!(", {title}"));
    }
    out.push('.');
    if !expertise.is_empty() {
        out.push_str(&format!(" Your expertise: {expertise}."));
    }
    if !goal.is_empty() {
        out.push_str(&format!(" Your goal: {goal}."));
    }
    if !role.is_empty() {
        out.push_str(&format!(" Your role in this team: {role}."));
    }
    out.push_str(
        " You are participating in a team meeting. Speak in your own voice, \
         ground your contributions in your expertise, and engage with what \
         other participants have said.",
    );
    out
}

/// Full system prompt for a speaker in a meeting with the given output type.
///
/// In code meetings, coding agents get the JSON-manifest instruction and
/// everyone else an explicit "no code" instruction; other output types use
/// the persona unchanged.
pub fn system_prompt_for(agent: &Agent, output_type: OutputType) -> String {
    let base = if agent.system_prompt.is_empty() {
        agent_system_prompt(&agent.name, &agent.title, &agent.expertise, &agent.goal, &agent.role)
    } else {
        agent.system_prompt.clone()
    };
    if output_type != OutputType::Code {
        return base;
    }
    if super::roles::is_coding_role(agent) || super::roles::detect_role(agent) == super::roles::RoleClass::Lead {
        format!("{base}{CODE_MANIFEST_INSTRUCTION}")
    } else {
        format!("{base}{NO_CODE_INSTRUCTION}")
    }
}

/// Pseudo-user message injected at round 1 of every structured meeting.
#[allow(clippy::too_many_arguments)]
pub fn meeting_start_prompt(
    team_lead_name: &str,
    member_names: &[String],
    agenda: &str,
    agenda_questions: &[String],
    agenda_rules: &[String],
    num_rounds: u32,
    preferred_lang: Option<&str>,
    critic_name: Option<&str>,
) -> String {
    let mut out = String::from("## Meeting Setup\n\n");
    out.push_str(&format!("Team Lead: {team_lead_name}\n"));
    if !member_names.is_empty() {
        out.push_str(&format!("Team Members: {}\n", member_names.join(", ")));
    }
    if let Some(critic) = critic_name {
        out.push_str(&format!("Critic: {critic}\n"));
    }
    out.push_str(&format!(
        "This meeting runs for {num_rounds} round(s) of discussion.\n"
    ));

    if !agenda.is_empty() {
        out.push_str(&format!("\n## Agenda\n\n{agenda}\n"));
    }
    if !agenda_questions.is_empty() {
        out.push_str("\n## Questions to Answer\n\n");
        for (i, q) in agenda_questions.iter().enumerate() {
            out.push_str(&format!("{}. {q}\n", i + 1));
        }
    }
    if !agenda_rules.is_empty() {
        out.push_str("\n## Rules\n\n");
        for r in agenda_rules {
            out.push_str(&format!("- {r}\n"));
        }
    }
    if let Some(lang) = preferred_lang {
        out.push_str(&format!("\nRespond in {lang} throughout this meeting.\n"));
    }
    out
}

/// Start prompt for an individual meeting: one agent in dialogue with a
/// synthetic critic instead of a full team.
pub fn individual_meeting_start_prompt(
    agent_name: &str,
    critic_name: &str,
    agenda: &str,
    agenda_questions: &[String],
    agenda_rules: &[String],
    num_rounds: u32,
    preferred_lang: Option<&str>,
) -> String {
    let mut out = String::from("## Individual Meeting Setup\n\n");
    out.push_str(&format!(
        "{agent_name} works through the agenda alone; {critic_name} reviews each response.\n"
    ));
    out.push_str(&format!(
        "This meeting runs for {num_rounds} round(s); the final round is {agent_name}'s answer alone.\n"
    ));
    if !agenda.is_empty() {
        out.push_str(&format!("\n## Agenda\n\n{agenda}\n"));
    }
    if !agenda_questions.is_empty() {
        out.push_str("\n## Questions to Answer\n\n");
        for (i, q) in agenda_questions.iter().enumerate() {
            out.push_str(&format!("{}. {q}\n", i + 1));
        }
    }
    if !agenda_rules.is_empty() {
        out.push_str("\n## Rules\n\n");
        for r in agenda_rules {
            out.push_str(&format!("- {r}\n"));
        }
    }
    if let Some(lang) = preferred_lang {
        out.push_str(&format!("\nRespond in {lang} throughout this meeting.\n"));
    }
    out
}

/// Round-1 prompt for the Team Lead: open the discussion.
pub fn team_lead_initial_prompt(team_lead_name: &str) -> String {
    format!(
        "{team_lead_name}, as the Team Lead, open the meeting: state your initial \
         assessment of the agenda, propose an approach, and pose the specific \
         questions you want each team member to address this round."
    )
}

/// Middle-round prompt for the Team Lead: synthesize and redirect.
pub fn team_lead_synthesis_prompt(team_lead_name: &str, round: u32, num_rounds: u32) -> String {
    format!(
        "{team_lead_name}, this is round {round}/{num_rounds}. Synthesize the discussion so far: \
         summarize points of agreement and disagreement, make interim decisions, \
         and direct the team toward what still needs to be resolved."
    )
}

/// Final-round prompt for the Team Lead: emit the structured output.
pub fn team_lead_final_prompt(
    team_lead_name: &str,
    agenda: &str,
    questions: &[String],
    rules: &[String],
    output_type: OutputType,
) -> String {
    let mut out = format!(
        "{team_lead_name}, this is the FINAL round. Produce the meeting's complete \
         deliverable now, incorporating the whole discussion. Do not defer anything \
         to future work unless unavoidable.\n"
    );
    if !agenda.is_empty() {
        out.push_str(&format!("\nAgenda: {agenda}\n"));
    }
    if !questions.is_empty() {
        out.push_str("\nAnswer each of these questions explicitly:\n");
        for (i, q) in questions.iter().enumerate() {
            out.push_str(&format!("{}. {q}\n", i + 1));
        }
    }
    if !rules.is_empty() {
        out.push_str("\nRespect these rules:\n");
        for r in rules {
            out.push_str(&format!("- {r}\n"));
        }
    }
    out.push_str("\nStructure your answer exactly as follows:\n\n");
    out.push_str(&output_structure_prompt(output_type, !questions.is_empty()));
    out
}

/// Prompt for a regular team member. From round 2 on, members may answer
/// with an explicit "PASS" when they have nothing to add.
pub fn team_member_prompt(member_name: &str, round: u32, num_rounds: u32) -> String {
    if round <= 1 {
        format!(
            "{member_name}, contribute your expert perspective on the agenda and the \
             Team Lead's questions. Focus on what your expertise uniquely adds."
        )
    } else {
        format!(
            "{member_name}, this is round {round}/{num_rounds}. Respond to the discussion so far \
             from your area of expertise. If you have nothing new to add, reply with \
             exactly \"PASS\"."
        )
    }
}

/// Prompt for the critic's turn at the end of a round.
pub fn critic_prompt(critic_name: &str, round: u32, num_rounds: u32) -> String {
    format!(
        "{critic_name}, this is round {round}/{num_rounds}. Critically review the round's \
         contributions: identify unsupported claims, missing considerations, and \
         methodological weaknesses. Be specific and constructive; do not propose \
         your own solution."
    )
}

/// Prompt for the integrator in code meetings: consolidate files into one tree.
pub fn integrator_prompt(integrator_name: &str) -> String {
    format!(
        "{integrator_name}, consolidate all code proposed in this meeting into a single \
         consistent file tree: resolve naming conflicts, remove duplication, and \
         emit the final version of every file."
    )
}

/// Prompt seeding a rewrite meeting from its parent's output plus feedback.
pub fn rewrite_meeting_prompt(feedback: &str, parent_output: &str) -> String {
    format!(
        "This meeting revises the output of a previous meeting under explicit feedback.\n\n\
         ## Previous Output\n\n{parent_output}\n\n\
         ## Feedback to Address\n\n{feedback}\n\n\
         Rework the output so every point of feedback is addressed; keep what was \
         not criticized."
    )
}

/// Prompt for the lead of a merge meeting: synthesize source-meeting outputs.
pub fn merge_meeting_prompt(team_lead_name: &str, num_sources: usize) -> String {
    format!(
        "{team_lead_name}, this meeting merges the outputs of {num_sources} previous meeting(s), \
         provided above as bracketed summaries. Synthesize them into one coherent \
         answer: reconcile contradictions, keep the strongest elements of each, \
         and state which source each major decision came from."
    )
}

/// Wrap prior-meeting context summaries with explicit begin/end markers so
/// models can tell injected context apart from live discussion. Returns
/// `None` when there is nothing to inject.
pub fn previous_context_prompt(summaries: &[ContextSummary]) -> Option<String> {
    if summaries.is_empty() {
        return None;
    }
    let mut out = String::from(
        "Context from previous meetings, for reference during this discussion:\n\n",
    );
    for (i, s) in summaries.iter().enumerate() {
        let n = i + 1;
        out.push_str(&format!(
            "[begin summary {n}]\n{}\n\n{}\n[end summary {n}]\n\n",
            s.title, s.summary
        ));
    }
    Some(out.trim_end().to_string())
}

/// Output-structure template emitted by the final lead prompt. Unknown
/// output types fall back to the code template.
pub fn output_structure_prompt(output_type: OutputType, has_questions: bool) -> String {
    let mut out = String::from("### Agenda\n\nRestate the agenda in one paragraph.\n\n");
    match output_type {
        OutputType::Code => {
            out.push_str(
                "### Code Artifacts\n\nAll final code, one file per artifact, each with its \
                 full relative path.\n\n\
                 ### Usage Instructions\n\nHow to run the code, including dependencies.\n\n",
            );
        }
        OutputType::Report => {
            out.push_str(
                "### Findings\n\nThe concrete findings of the meeting.\n\n\
                 ### Analysis\n\nInterpretation of the findings.\n\n\
                 ### Conclusions\n\nDecisions and recommended next steps.\n\n",
            );
        }
        OutputType::Paper => {
            out.push_str(
                "### Abstract\n\nOne-paragraph summary of the contribution.\n\n\
                 ### Methods\n\nApproach in reproducible detail.\n\n\
                 ### Results\n\nWhat was found or produced.\n\n\
                 ### Discussion\n\nLimitations and implications.\n\n",
            );
        }
    }
    if has_questions {
        out.push_str(
            "### Answers to Agenda Questions\n\nAnswer every agenda question, numbered.\n",
        );
    }
    out.trim_end().to_string()
}

/// Sampling temperature by meeting phase: exploration (round 1), synthesis
/// (middle rounds), final output. Round 1 wins for single-round meetings.
pub fn phase_temperature(round: u32, num_rounds: u32) -> f64 {
    if round <= 1 {
        0.8
    } else if round >= num_rounds {
        0.2
    } else {
        0.4
    }
}

/// Format a persisted user message for re-insertion into the transcript.
/// Human-authored messages (no agent id, and the name empty or a generic
/// human label) get [`HUMAN_FEEDBACK_PREFIX`].
pub fn content_for_user_message(
    agent_id: Option<&str>,
    agent_name: Option<&str>,
    content: &str,
) -> String {
    if is_human_feedback(agent_id, agent_name) {
        format!("{HUMAN_FEEDBACK_PREFIX}{content}")
    } else {
        content.to_string()
    }
}

fn is_human_feedback(agent_id: Option<&str>, agent_name: Option<&str>) -> bool {
    if agent_id.map(|id| !id.trim().is_empty()).unwrap_or(false) {
        return false;
    }
    matches!(agent_name.map(str::trim), None | Some("") | Some("User") | Some("Human Expert"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn predefined_rules_nonempty() {
        assert!(CODING_RULES.len() >= 5);
        assert!(!REPORT_RULES.is_empty());
        assert!(!PAPER_RULES.is_empty());
        assert!(CONCISENESS_RULE.to_lowercase().contains("concise"));
    }

    #[test]
    fn default_rules_contain_type_rules_and_conciseness() {
        let code = default_rules(OutputType::Code);
        assert!(code.iter().any(|r| r == CONCISENESS_RULE));
        for r in CODING_RULES {
            assert!(code.iter().any(|x| x == r));
        }
        let report = default_rules(OutputType::Report);
        for r in REPORT_RULES {
            assert!(report.iter().any(|x| x == r));
        }
        let paper = default_rules(OutputType::Paper);
        for r in PAPER_RULES {
            assert!(paper.iter().any(|x| x == r));
        }
    }

    #[test]
    fn default_rules_returns_fresh_copies() {
        let mut r1 = default_rules(OutputType::Code);
        let r2 = default_rules(OutputType::Code);
        assert_eq!(r1, r2);
        r1.pop();
        assert_ne!(r1.len(), r2.len());
    }

    #[test]
    fn meeting_start_prompt_mentions_everyone() {
        let result = meeting_start_prompt(
            "Dr. Smith",
            &strings(&["Dr. Jones", "Dr. Lee"]),
            "Design a protein folding pipeline",
            &strings(&["What algorithm to use?", "What dataset?"]),
            &strings(&["Be concise"]),
            3,
            None,
            None,
        );
        assert!(result.contains("Dr. Smith"));
        assert!(result.contains("Dr. Jones"));
        assert!(result.contains("Dr. Lee"));
        assert!(result.contains("protein folding"));
        assert!(result.contains("What algorithm to use?"));
        assert!(result.contains("What dataset?"));
        assert!(result.contains("Be concise"));
        assert!(result.contains('3'));
    }

    #[test]
    fn meeting_start_prompt_omits_empty_sections() {
        let result = meeting_start_prompt("Lead", &strings(&["A"]), "", &[], &[], 1, None, None);
        assert!(!result.contains("## Agenda"));
        assert!(!result.contains("Questions to Answer"));
        assert!(!result.contains("## Rules"));
    }

    #[test]
    fn meeting_start_prompt_language_hint() {
        let with = meeting_start_prompt("Lead", &[], "Topic", &[], &[], 2, Some("Japanese"), None);
        assert!(with.contains("Respond in Japanese"));
        let without = meeting_start_prompt("Lead", &[], "Topic", &[], &[], 2, None, None);
        assert!(!without.contains("Respond in"));
    }

    #[test]
    fn lead_initial_prompt() {
        let result = team_lead_initial_prompt("Dr. Smith");
        assert!(result.contains("Dr. Smith"));
        assert!(result.contains("Team Lead"));
        assert!(result.to_lowercase().contains("initial") || result.to_lowercase().contains("approach"));
    }

    #[test]
    fn lead_synthesis_prompt_shows_round() {
        let result = team_lead_synthesis_prompt("Dr. Smith", 2, 5);
        assert!(result.contains("Dr. Smith"));
        assert!(result.contains("2/5"));
        assert!(result.to_lowercase().contains("synthesize"));
    }

    #[test]
    fn lead_final_prompt_with_questions() {
        let result = team_lead_final_prompt(
            "Dr. Smith",
            "Build ML pipeline",
            &strings(&["Which model?", "What metrics?"]),
            &strings(&["No pseudocode"]),
            OutputType::Code,
        );
        assert!(result.contains("FINAL"));
        assert!(result.contains("Dr. Smith"));
        assert!(result.contains("Which model?"));
        assert!(result.contains("What metrics?"));
        assert!(result.contains("No pseudocode"));
        assert!(result.contains("Code Artifacts"));
    }

    #[test]
    fn lead_final_prompt_report_without_questions() {
        let result = team_lead_final_prompt("Lead", "", &[], &[], OutputType::Report);
        assert!(result.contains("FINAL"));
        assert!(result.contains("Findings"));
        assert!(!result.contains("Answers to Agenda Questions"));
    }

    #[test]
    fn lead_final_prompt_paper_sections() {
        let result = team_lead_final_prompt(
            "Lead",
            "Write paper",
            &strings(&["Key contribution?"]),
            &[],
            OutputType::Paper,
        );
        assert!(result.contains("Abstract"));
        assert!(result.contains("Methods"));
        assert!(result.contains("Results"));
        assert!(result.contains("Discussion"));
    }

    #[test]
    fn member_prompt_phases() {
        let first = team_member_prompt("Dr. Jones", 1, 5);
        assert!(first.contains("Dr. Jones"));
        assert!(first.to_lowercase().contains("expert"));

        let middle = team_member_prompt("Dr. Jones", 3, 5);
        assert!(middle.contains("3/5"));
        assert!(middle.contains("PASS"));

        // Members never get a final-output prompt; only the lead speaks last.
        let last = team_member_prompt("Dr. Jones", 5, 5);
        assert!(last.contains("PASS"));
    }

    #[test]
    fn output_structure_templates() {
        let code = output_structure_prompt(OutputType::Code, true);
        assert!(code.contains("### Agenda"));
        assert!(code.contains("### Code Artifacts"));
        assert!(code.contains("### Usage Instructions"));
        assert!(code.contains("### Answers to Agenda Questions"));

        let code_no_q = output_structure_prompt(OutputType::Code, false);
        assert!(!code_no_q.contains("### Answers to Agenda Questions"));

        let report = output_structure_prompt(OutputType::Report, true);
        assert!(report.contains("### Findings"));
        assert!(report.contains("### Analysis"));
        assert!(report.contains("### Conclusions"));

        let paper = output_structure_prompt(OutputType::Paper, false);
        assert!(paper.contains("### Abstract"));
        assert!(paper.contains("### Methods"));
        assert!(paper.contains("### Results"));
        assert!(paper.contains("### Discussion"));
    }

    #[test]
    fn phase_temperature_schedule() {
        assert_eq!(phase_temperature(1, 5), 0.8);
        assert_eq!(phase_temperature(2, 5), 0.4);
        assert_eq!(phase_temperature(3, 5), 0.4);
        assert_eq!(phase_temperature(5, 5), 0.2);
        // Single round: exploration wins over final.
        assert_eq!(phase_temperature(1, 1), 0.8);
        assert_eq!(phase_temperature(1, 2), 0.8);
        assert_eq!(phase_temperature(2, 2), 0.2);
    }

    #[test]
    fn human_feedback_prefixing() {
        let human = content_for_user_message(None, None, "try a smaller model");
        assert_eq!(human, format!("{HUMAN_FEEDBACK_PREFIX}try a smaller model"));

        let named_human = content_for_user_message(None, Some("User"), "hello");
        assert!(named_human.starts_with(HUMAN_FEEDBACK_PREFIX));

        let from_agent = content_for_user_message(Some("a1"), Some("Dr. X"), "hello");
        assert_eq!(from_agent, "hello");
    }

    #[test]
    fn previous_context_markers() {
        let summaries = vec![
            ContextSummary { title: "Kickoff".to_string(), summary: "A".to_string() },
            ContextSummary { title: "Review".to_string(), summary: "B".to_string() },
        ];
        let out = previous_context_prompt(&summaries).unwrap();
        assert!(out.contains("[begin summary 1]"));
        assert!(out.contains("[end summary 1]"));
        assert!(out.contains("[begin summary 2]"));
        assert!(out.contains("[end summary 2]"));
        assert!(out.contains("Kickoff"));
        assert!(out.contains('A'));
        assert!(out.contains('B'));

        assert!(previous_context_prompt(&[]).is_none());
    }

    #[test]
    fn merge_and_rewrite_prompts() {
        let merge = merge_meeting_prompt("Lead", 2);
        assert!(merge.contains("Lead"));
        assert!(merge.contains('2'));

        let rewrite = rewrite_meeting_prompt("tighten the abstract", "old text");
        assert!(rewrite.contains("tighten the abstract"));
        assert!(rewrite.contains("old text"));
        assert!(rewrite.contains("Feedback"));
    }

    #[test]
    fn system_prompt_code_rules() {
        let engineer = Agent::new("t", "Eve", "ML Engineer", "pytorch", "build it", "engineer", "gpt-4o");
        let sys = system_prompt_for(&engineer, OutputType::Code);
        assert!(sys.contains("JSON array of file objects"));

        let biologist = Agent::new("t", "Bea", "Biologist", "genomics", "advise", "domain expert", "gpt-4o");
        let sys = system_prompt_for(&biologist, OutputType::Code);
        assert!(sys.contains("Do not write code"));

        let sys = system_prompt_for(&biologist, OutputType::Report);
        assert!(!sys.contains("Do not write code"));
        assert!(!sys.contains("JSON array"));
    }
}
