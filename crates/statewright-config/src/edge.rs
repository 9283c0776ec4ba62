use serde::{Deserialize, Serialize};

use crate::enums::TransitionType;

/// A typed edge between two states of the same machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDef {
  pub from: String,
  pub to: String,
  #[serde(rename = "type", default = "TransitionType::success")]
  pub transition_type: TransitionType,
}

impl TransitionDef {
  pub fn success(from: impl Into<String>, to: impl Into<String>) -> Self {
    Self {
      from: from.into(),
      to: to.into(),
      transition_type: TransitionType::Success,
    }
  }

  pub fn failure(from: impl Into<String>, to: impl Into<String>) -> Self {
    Self {
      from: from.into(),
      to: to.into(),
      transition_type: TransitionType::Failure,
    }
  }
}
