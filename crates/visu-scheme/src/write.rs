//! Validation of user writes and construction of `set` commands.

use crate::catalog::{Element, ElementKind, BOOL_CHOICES};
use crate::error::WriteRejection;
use crate::protocol::Command;

/// Checks `candidate` against the constraints of `element`'s type.
///
/// Writability is not part of this check; see [`WriteForm::can_submit`].
pub fn validate(element: &Element, candidate: &str) -> Result<(), WriteRejection> {
    match element.kind {
        ElementKind::Text => check_choices(element, &element.choices, candidate),
        ElementKind::Bool => {
            if element.choices.is_empty() {
                let defaults = BOOL_CHOICES.map(str::to_string);
                check_choices(element, &defaults, candidate)
            } else {
                check_choices(element, &element.choices, candidate)
            }
        }
        ElementKind::Int => {
            let value = candidate
                .trim()
                .parse::<i64>()
                .map_err(|_| WriteRejection::NotANumber)?;
            #[allow(clippy::cast_precision_loss)]
            check_bounds(element, value as f64)
        }
        ElementKind::Float => {
            let value = candidate
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|value| !value.is_nan())
                .ok_or(WriteRejection::NotANumber)?;
            check_bounds(element, value)
        }
    }
}

fn check_choices(
    element: &Element,
    choices: &[String],
    candidate: &str,
) -> Result<(), WriteRejection> {
    if !choices.is_empty() && !choices.iter().any(|choice| choice == candidate) {
        return Err(WriteRejection::NotOneOf(choices.to_vec()));
    }
    if let Some(pattern) = &element.pattern {
        if !pattern.is_match(candidate) {
            return Err(WriteRejection::NoMatch(pattern.as_str().to_string()));
        }
    }
    Ok(())
}

fn check_bounds(element: &Element, value: f64) -> Result<(), WriteRejection> {
    if let Some(min) = element.min {
        if value < min {
            return Err(WriteRejection::LessThan(min));
        }
    }
    if let Some(max) = element.max {
        if value > max {
            return Err(WriteRejection::MoreThan(max));
        }
    }
    Ok(())
}

/// Validates and builds the `set` command for one write.
pub fn build_write(element: &Element, candidate: &str) -> Result<Command, WriteRejection> {
    if !element.write {
        return Err(WriteRejection::NotWritable);
    }
    validate(element, candidate)?;
    Ok(Command::set(element.data_id.clone(), candidate.to_string()))
}

/// Input state of the write dialog for one element.
///
/// Validation runs on every input change so the submit button can follow it.
#[derive(Debug, Clone)]
pub struct WriteForm<'a> {
    element: &'a Element,
    input: String,
    verdict: Result<(), WriteRejection>,
}

impl<'a> WriteForm<'a> {
    pub fn new(element: &'a Element) -> Self {
        let mut form = Self {
            element,
            input: String::new(),
            verdict: Ok(()),
        };
        form.revalidate();
        form
    }

    #[must_use]
    pub fn element(&self) -> &'a Element {
        self.element
    }

    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, input: impl Into<String>) {
        self.input = input.into();
        self.revalidate();
    }

    fn revalidate(&mut self) {
        self.verdict = validate(self.element, &self.input);
    }

    /// Message to show under the input, if the current value is refused.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        self.verdict.as_ref().err().map(ToString::to_string)
    }

    #[must_use]
    pub fn can_submit(&self) -> bool {
        self.element.write && self.verdict.is_ok()
    }

    /// Builds the `set` command and clears the input. On rejection the
    /// input is kept so the user can correct it.
    pub fn submit(&mut self) -> Result<Command, WriteRejection> {
        let command = build_write(self.element, &self.input)?;
        self.set_input(String::new());
        Ok(command)
    }
}
