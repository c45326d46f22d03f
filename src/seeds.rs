//! Built-in example content so a fresh site shows a working form.

use serde_json::{json, Value};

/// Example questionnaire covering every question type.
pub fn example_questions() -> Value {
  json!([
    {
      "text": "How old are you?",
      "type": "number",
      "priority": 1,
      "validators": { "required": true, "min": 13, "max": 120 }
    },
    {
      "text": "Why would you like to join the team?",
      "type": "textarea",
      "validators": { "required": true, "min": 30, "max": 2000 }
    },
    {
      "text": "Which timezone are you usually active in?",
      "type": "dropdown",
      "data": ["Americas", "Europe / Africa", "Asia / Oceania"],
      "validators": { "required": true }
    },
    {
      "text": "Have you moderated a community before?",
      "type": "radio",
      "data": ["Yes", "No"]
    },
    {
      "text": "Which areas interest you?",
      "type": "checkbox",
      "data": ["Queue review", "AutoModerator", "Community events", "Wiki"],
      "validators": { "min": 1 }
    },
    {
      "text": "Anything else we should know?",
      "type": "text",
      "validators": { "max": 300 }
    }
  ])
}

/// Example response body showing every placeholder.
pub fn example_response_body() -> String {
  concat!(
    "**User:** /u/{username}\n\n",
    "**Karma:** {post_karma} post / {comment_karma} comment ({combined_karma} combined)\n\n",
    "**Account age:** {age}\n\n",
    "**Verified email:** {is_verified} | **Moderator elsewhere:** {is_mod}\n\n",
    "---\n",
    "{response}",
  )
  .to_string()
}
