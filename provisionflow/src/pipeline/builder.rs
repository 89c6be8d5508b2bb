//! Pipeline builder with validation.

use crate::errors::PipelineValidationError;
use crate::stages::Stage;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// An ordered, validated list of stages.
///
/// Stages run strictly in the order they were added.
#[derive(Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false for a built pipeline.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Narrows the pipeline to the named stages.
    ///
    /// The original order is kept regardless of the order of `names`, since
    /// later stages consume handles produced by earlier ones.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is unknown or nothing is selected.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, PipelineValidationError> {
        let wanted: HashSet<&str> = names.iter().map(AsRef::as_ref).collect();

        let mut unknown: Vec<String> = wanted
            .iter()
            .filter(|name| !self.stages.iter().any(|s| s.name() == **name))
            .map(|name| (*name).to_string())
            .collect();
        if !unknown.is_empty() {
            unknown.sort();
            return Err(PipelineValidationError::new(format!(
                "Unknown stage(s) {}; available: {}",
                unknown.join(", "),
                self.stage_names().join(", ")
            ))
            .with_stages(unknown));
        }

        let stages: Vec<_> = self
            .stages
            .iter()
            .filter(|s| wanted.contains(s.name()))
            .cloned()
            .collect();
        if stages.is_empty() {
            return Err(PipelineValidationError::new("Stage selection is empty"));
        }

        Ok(Self {
            name: self.name.clone(),
            stages,
        })
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Builder for creating validated pipelines.
#[derive(Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Appends a stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage name is empty or already used.
    pub fn stage(self, stage: impl Stage + 'static) -> Result<Self, PipelineValidationError> {
        self.stage_arc(Arc::new(stage))
    }

    /// Appends a shared stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage name is empty or already used.
    pub fn stage_arc(mut self, stage: Arc<dyn Stage>) -> Result<Self, PipelineValidationError> {
        let name = stage.name();
        if name.trim().is_empty() {
            return Err(PipelineValidationError::new("Stage name cannot be empty"));
        }
        if stage.resource_kind().trim().is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Stage '{name}' declares no resource kind"
            ))
            .with_stages(vec![name.to_string()]));
        }
        if self.stages.iter().any(|s| s.name() == name) {
            return Err(PipelineValidationError::new(format!(
                "Duplicate stage name '{name}'"
            ))
            .with_stages(vec![name.to_string()]));
        }

        self.stages.push(stage);
        Ok(self)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder has no stages.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages"));
        }

        Ok(Pipeline {
            name: self.name,
            stages: self.stages,
        })
    }
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("stages", &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedStage;
    use pretty_assertions::assert_eq;

    fn three_stage() -> Pipeline {
        PipelineBuilder::new("test")
            .stage(ScriptedStage::succeeding("a", "project"))
            .unwrap()
            .stage(ScriptedStage::succeeding("b", "branch"))
            .unwrap()
            .stage(ScriptedStage::succeeding("c", "database"))
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_keeps_insertion_order() {
        let pipeline = three_stage();

        assert_eq!(pipeline.name(), "test");
        assert_eq!(pipeline.stage_names(), vec!["a", "b", "c"]);
        assert_eq!(pipeline.len(), 3);
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let err = PipelineBuilder::new("empty").build().unwrap_err();
        assert!(err.message.contains("no stages"));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let err = PipelineBuilder::new("dup")
            .stage(ScriptedStage::succeeding("a", "project"))
            .unwrap()
            .stage(ScriptedStage::succeeding("a", "branch"))
            .unwrap_err();

        assert_eq!(err.stages, vec!["a".to_string()]);
    }

    #[test]
    fn test_empty_name_rejected() {
        let result = PipelineBuilder::new("x").stage(ScriptedStage::succeeding(" ", "project"));
        assert!(result.is_err());
    }

    #[test]
    fn test_select_keeps_pipeline_order() {
        let selected = three_stage().select(&["c", "a"]).unwrap();
        assert_eq!(selected.stage_names(), vec!["a", "c"]);
    }

    #[test]
    fn test_select_unknown_stage() {
        let err = three_stage().select(&["a", "zzz"]).unwrap_err();

        assert_eq!(err.stages, vec!["zzz".to_string()]);
        assert!(err.message.contains("available: a, b, c"));
    }

    #[test]
    fn test_select_nothing() {
        let none: [&str; 0] = [];
        assert!(three_stage().select(&none).is_err());
    }
}
