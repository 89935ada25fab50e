//! Agent role detection: classifies agents as lead, critic, or member by
//! keyword match over their name, title, and role fields, and picks the
//! speaker ordering for a meeting.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::Agent;

static LEAD_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(principal\s*investigator|pi\b|team\s*lead|lead\s*scientist|project\s*lead|director|head\s+of|chief|supervisor|coordinator)",
    )
    .expect("lead keyword regex")
});

static CRITIC_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(critic|reviewer|evaluator|scientific\s*critic|peer\s*review)")
        .expect("critic keyword regex")
});

static CODING_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(engineer|developer|programmer|coding|software\s*engineer|ml\s*engineer|code\s*engineer|implementation|programming)",
    )
    .expect("coding keyword regex")
});

static INTEGRATOR_KEYWORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(integrator|integration|consolidat)").expect("integrator keyword regex"));

/// Classification used for speaker ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleClass {
    Lead,
    Critic,
    Member,
}

fn role_text(agent: &Agent) -> String {
    format!("{} {} {}", agent.name, agent.title, agent.role)
}

/// Detect an agent's meeting role from its name, title, and role fields.
/// Critic keywords win over lead keywords (a "scientific critic and reviewer
/// coordinator" is still a critic).
pub fn detect_role(agent: &Agent) -> RoleClass {
    let text = role_text(agent);
    if CRITIC_KEYWORDS.is_match(&text) {
        RoleClass::Critic
    } else if LEAD_KEYWORDS.is_match(&text) {
        RoleClass::Lead
    } else {
        RoleClass::Member
    }
}

/// True if the agent is responsible for writing code. Unlike [`detect_role`],
/// this also looks at the expertise field.
pub fn is_coding_role(agent: &Agent) -> bool {
    let text = format!("{} {} {} {}", agent.name, agent.title, agent.expertise, agent.role);
    CODING_KEYWORDS.is_match(&text)
}

/// Speaker ordering for one meeting: `(team_lead, members, critic)`.
///
/// First keyword match wins within each class. With no explicit lead the
/// first member is promoted; a critic-only team gets its critic as lead.
/// Returns `None` for an empty agent list.
pub fn sort_agents_for_meeting(agents: &[Agent]) -> Option<(Agent, Vec<Agent>, Option<Agent>)> {
    if agents.is_empty() {
        return None;
    }

    let mut lead: Option<Agent> = None;
    let mut critic: Option<Agent> = None;
    let mut members: Vec<Agent> = Vec::new();

    for agent in agents {
        match detect_role(agent) {
            RoleClass::Lead if lead.is_none() => lead = Some(agent.clone()),
            RoleClass::Critic if critic.is_none() => critic = Some(agent.clone()),
            _ => members.push(agent.clone()),
        }
    }

    let lead = match lead {
        Some(l) => l,
        None => {
            if !members.is_empty() {
                members.remove(0)
            } else {
                // Only a critic exists; it has to run the meeting.
                return critic.map(|c| (c, members, None));
            }
        }
    };

    Some((lead, members, critic))
}

/// Choose the agent that consolidates code in a code meeting: a member with
/// integrator keywords, else a coding member, else the team lead.
pub fn detect_integrator<'a>(
    team_lead: &'a Agent,
    members: &'a [Agent],
    _critic: Option<&'a Agent>,
) -> &'a Agent {
    let has_integrator_keyword = |a: &Agent| {
        let text = format!("{} {} {}", a.title, a.expertise, a.role);
        INTEGRATOR_KEYWORDS.is_match(&text)
    };

    if let Some(m) = members.iter().find(|m| has_integrator_keyword(m)) {
        return m;
    }
    if let Some(m) = members.iter().find(|m| is_coding_role(m)) {
        return m;
    }
    team_lead
}
