//! Prompt context builders. Mechanics only: each function assembles the
//! facts a handler's model call needs plus the JSON shape it must emit.

use rand::seq::IndexedRandom;

use crate::schema::SchemaDescriptor;
use crate::session::{EvaluationRecord, ExerciseConfig, Verdict};
use crate::history::Turn;

/// Appended to every structured-output system prompt.
pub fn json_instruction(schema: &SchemaDescriptor) -> String {
    format!(
        "Respond with a single JSON object of the form {} and nothing else.",
        schema.render()
    )
}

pub fn roleplay_system(config: &ExerciseConfig, schema: &SchemaDescriptor) -> String {
    let scene = match &config.persona {
        Some(p) => format!(
            "You play {} ({}). The learner plays {}. Scenario: {}.",
            p.assistant_role, p.assistant_gender, p.learner_role, p.scenario
        ),
        None => format!("You are a conversation partner on the topic \"{}\".", config.topic),
    };
    format!(
        "You are roleplaying in {practice} with a {level} learner. {scene} \
         Keep each reply to one or two sentences in {practice} and include a {source} \
         translation in the `translation` field. Set `is_done` to true only when the \
         scene has naturally concluded. {json}",
        practice = config.practice_language,
        source = config.source_language,
        level = config.level,
        scene = scene,
        json = json_instruction(schema),
    )
}

/// The synthetic user payload that asks for the scene-setting first line.
pub fn roleplay_opening_payload() -> String {
    "Begin the scene with your opening line.".to_string()
}

pub fn guidance_system(
    config: &ExerciseConfig,
    last_assistant: Option<&str>,
    schema: &SchemaDescriptor,
) -> String {
    let anchor = match last_assistant {
        Some(line) => format!("The most recent assistant message was: \"{line}\"."),
        None => "The exercise has not produced any assistant message yet.".to_string(),
    };
    format!(
        "You are a {practice} tutor for a {level} learner working on \"{topic}\". \
         The learner has sent a question or an off-task message instead of attempting \
         the task. {anchor} Answer helpfully in one short paragraph, then steer them \
         back to the exercise. Do not evaluate, do not advance the exercise. {json}",
        practice = config.practice_language,
        level = config.level,
        topic = config.topic,
        anchor = anchor,
        json = json_instruction(schema),
    )
}

pub fn classification_system(expected_task: &str, schema: &SchemaDescriptor) -> String {
    format!(
        "You classify one learner message. The expected task is: {expected_task}. \
         Category `on_task` means the message is a genuine attempt at that task. \
         Category `off_task` means it is a question, confusion, chatter, or anything \
         else. {json}",
        expected_task = expected_task,
        json = json_instruction(schema),
    )
}

pub fn evaluation_system(
    config: &ExerciseConfig,
    target: &str,
    schema: &SchemaDescriptor,
) -> String {
    format!(
        "You are grading one translation attempt by a {level} learner. \
         The {source} target sentence is: \"{target}\". The learner was asked to \
         translate it into {practice}. Score the attempt from 0 to 100 for meaning \
         and grammar, and give one or two sentences of feedback in plain language. {json}",
        level = config.level,
        source = config.source_language,
        practice = config.practice_language,
        target = target,
        json = json_instruction(schema),
    )
}

pub fn hint_system(config: &ExerciseConfig, focus: &str, schema: &SchemaDescriptor) -> String {
    format!(
        "You are helping a {level} learner who is stuck. They must respond in \
         {practice} to: \"{focus}\". Give a short hint with useful vocabulary or \
         sentence structure. Do not give a complete answer. {json}",
        level = config.level,
        practice = config.practice_language,
        focus = focus,
        json = json_instruction(schema),
    )
}

pub fn summary_system(config: &ExerciseConfig, schema: &SchemaDescriptor) -> String {
    format!(
        "You are writing the final review of a {level} learner's \"{topic}\" practice \
         session. Score accuracy, fluency, vocabulary and grammar from 0 to 100, plus \
         an overall score. `feedback` is a short paragraph addressed to the learner. \
         `suggestions` lists two or three concrete next steps. {json}",
        level = config.level,
        topic = config.topic,
        json = json_instruction(schema),
    )
}

/// Flattens what the summary model call needs to see: every evaluation
/// and the whole transcript, not just the prompt window.
pub fn summary_payload(records: &[EvaluationRecord], transcript: &[Turn]) -> String {
    let mut lines = Vec::new();
    lines.push(format!("Evaluations ({}):", records.len()));
    for record in records {
        let verdict = match record.verdict {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
        };
        lines.push(format!(
            "- target {}: {} (score {}): {}",
            record.target_index, verdict, record.score, record.feedback
        ));
    }
    lines.push(format!("Transcript ({} turns):", transcript.len()));
    for turn in transcript {
        lines.push(format!("- {}: {}", turn.role, turn.content));
    }
    lines.join("\n")
}

pub fn passage_system(config: &ExerciseConfig, schema: &SchemaDescriptor) -> String {
    format!(
        "You write short practice passages in {source} for {level} learners of \
         {practice}. The passage must be natural, split into standalone sentences \
         suitable for one-by-one translation. `full_text` is the whole passage, \
         `sentences` the same text split into sentences in order. {json}",
        source = config.source_language,
        practice = config.practice_language,
        level = config.level,
        json = json_instruction(schema),
    )
}

const PASSAGE_TEMPLATES: &[&str] = &[
    "Write a passage of approximately {words} words about \"{topic}\".",
    "Compose a short story of approximately {words} words set around \"{topic}\".",
    "Write approximately {words} words describing an everyday situation involving \"{topic}\".",
];

pub fn passage_payload(topic: &str, words: usize) -> String {
    let template = PASSAGE_TEMPLATES
        .choose(&mut rand::rng())
        .unwrap_or(&PASSAGE_TEMPLATES[0]);
    template
        .replace("{words}", &words.to_string())
        .replace("{topic}", topic)
}

pub fn passage_revision_payload(feedback: &str) -> String {
    format!(
        "Revise the previous passage. {feedback} Keep the topic and difficulty \
         unchanged and return the full revised passage."
    )
}

const TARGET_TEMPLATES: &[&str] = &[
    "Sentence {number} of {total}. Translate into {practice}:\n{target}",
    "Next one ({number}/{total}). Translate this into {practice}:\n{target}",
    "Here is sentence {number} of {total}. Give it a try in {practice}:\n{target}",
];

/// The assistant turn that presents one drill target. `index` is
/// zero-based.
pub fn target_prompt(config: &ExerciseConfig, index: usize, total: usize, target: &str) -> String {
    let template = TARGET_TEMPLATES
        .choose(&mut rand::rng())
        .unwrap_or(&TARGET_TEMPLATES[0]);
    template
        .replace("{number}", &(index + 1).to_string())
        .replace("{total}", &total.to_string())
        .replace("{practice}", &config.practice_language)
        .replace("{target}", target)
}

pub fn drill_complete_message() -> String {
    "That was the last sentence. The exercise is complete; ask for a final summary \
     whenever you are ready."
        .to_string()
}

/// Tail appended to evaluation feedback when the submission did not pass.
pub fn retry_message() -> String {
    "Give it another try.".to_string()
}

/// User-side payload sent to the model when a roleplay turn is skipped.
pub fn skip_payload() -> String {
    "The learner passed on this turn. Carry the scene forward yourself.".to_string()
}

pub fn hint_payload() -> String {
    "The learner asked for a hint. Reply with the hint only.".to_string()
}

pub fn scene_closed_message() -> String {
    "This conversation has wrapped up. Ask for a final summary to see how you did."
        .to_string()
}

pub fn expected_task_description(config: &ExerciseConfig, target: Option<&str>) -> String {
    match target {
        Some(target) => format!(
            "translating the {} sentence \"{}\" into {}",
            config.source_language, target, config.practice_language
        ),
        None => format!(
            "continuing a {} roleplay conversation about \"{}\"",
            config.practice_language, config.topic
        ),
    }
}
