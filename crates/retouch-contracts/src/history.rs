use chrono::{SecondsFormat, Utc};

use crate::blob::ImageBlob;

/// One immutable snapshot in an edit lineage.
#[derive(Debug, Clone, PartialEq)]
pub struct Version {
    version_id: String,
    order: usize,
    operation: String,
    created_at: String,
    image: ImageBlob,
}

impl Version {
    pub fn new(image: ImageBlob, operation: impl Into<String>) -> Self {
        Self {
            version_id: image.short_id(),
            order: 0,
            operation: operation.into(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            image,
        }
    }

    pub fn version_id(&self) -> &str {
        &self.version_id
    }

    /// Creation order within the lineage; keeps growing after truncation.
    pub fn order(&self) -> usize {
        self.order
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn created_at(&self) -> &str {
        &self.created_at
    }

    pub fn image(&self) -> &ImageBlob {
        &self.image
    }
}

/// Linear undo/redo stack over a single image lineage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditHistory {
    versions: Vec<Version>,
    cursor: Option<usize>,
    created: usize,
}

impl EditHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh lineage with `version` as the original.
    pub fn seed(&mut self, mut version: Version) {
        version.order = 0;
        self.versions = vec![version];
        self.cursor = Some(0);
        self.created = 1;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Drops the redo branch, then pushes `version` and points at it.
    pub fn append(&mut self, mut version: Version) {
        let Some(cursor) = self.cursor else {
            self.seed(version);
            return;
        };
        self.versions.truncate(cursor + 1);
        version.order = self.created;
        self.created += 1;
        self.versions.push(version);
        self.cursor = Some(self.versions.len() - 1);
    }

    pub fn undo(&mut self) -> bool {
        match self.cursor {
            Some(cursor) if cursor > 0 => {
                self.cursor = Some(cursor - 1);
                true
            }
            _ => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.cursor {
            Some(cursor) if cursor + 1 < self.versions.len() => {
                self.cursor = Some(cursor + 1);
                true
            }
            _ => false,
        }
    }

    /// Moves the cursor to the original. Later versions stay reachable by
    /// redo until the next append truncates them.
    pub fn reset_to_origin(&mut self) -> bool {
        match self.cursor {
            Some(cursor) if cursor > 0 => {
                self.cursor = Some(0);
                true
            }
            _ => false,
        }
    }

    pub fn current(&self) -> Option<&Version> {
        self.cursor.and_then(|cursor| self.versions.get(cursor))
    }

    pub fn original(&self) -> Option<&Version> {
        self.versions.first()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.cursor, Some(cursor) if cursor > 0)
    }

    pub fn can_redo(&self) -> bool {
        matches!(self.cursor, Some(cursor) if cursor + 1 < self.versions.len())
    }
}

#[cfg(test)]
mod tests {
    use crate::blob::testing::blob;

    use super::*;

    fn version(tag: u8) -> Version {
        Version::new(blob(&format!("v{tag}.png"), tag), "test")
    }

    fn current_tag(history: &EditHistory) -> Option<String> {
        history
            .current()
            .map(|version| version.image().name().to_string())
    }

    /// Reference model: a plain vector plus index, written as naively as
    /// possible.
    #[derive(Default)]
    struct Model {
        items: Vec<u8>,
        index: usize,
    }

    impl Model {
        fn append(&mut self, tag: u8) {
            if !self.items.is_empty() {
                self.items = self.items[..=self.index].to_vec();
            }
            self.items.push(tag);
            self.index = self.items.len() - 1;
        }

        fn undo(&mut self) {
            if self.index > 0 {
                self.index -= 1;
            }
        }

        fn redo(&mut self) {
            if self.index + 1 < self.items.len() {
                self.index += 1;
            }
        }
    }

    #[test]
    fn empty_history_has_no_cursor() {
        let mut history = EditHistory::new();
        assert!(history.current().is_none());
        assert!(history.original().is_none());
        assert_eq!(history.cursor(), None);
        assert!(!history.undo());
        assert!(!history.redo());
        assert!(!history.reset_to_origin());
    }

    #[test]
    fn append_after_undo_discards_redo_branch() {
        let mut history = EditHistory::new();
        history.seed(version(0));
        history.append(version(1));
        history.append(version(2));
        assert!(history.undo());
        assert!(history.undo());
        history.append(version(3));

        assert_eq!(history.len(), 2);
        assert_eq!(history.cursor(), Some(1));
        assert_eq!(current_tag(&history).as_deref(), Some("v3.png"));
        assert!(!history.can_redo());
        assert_eq!(history.versions()[1].order(), 3);
    }

    #[test]
    fn undo_and_redo_stay_in_bounds() {
        let mut history = EditHistory::new();
        history.seed(version(0));
        assert!(!history.undo());
        assert!(!history.redo());
        history.append(version(1));
        assert!(!history.redo());
        assert!(history.undo());
        assert!(!history.undo());
        assert_eq!(history.cursor(), Some(0));
    }

    #[test]
    fn reset_is_a_cursor_move_not_a_truncation() {
        let mut history = EditHistory::new();
        history.seed(version(0));
        history.append(version(1));
        history.append(version(2));
        assert!(history.reset_to_origin());
        assert_eq!(history.len(), 3);
        assert_eq!(current_tag(&history).as_deref(), Some("v0.png"));
        assert!(history.redo());
        assert!(history.redo());
        assert_eq!(current_tag(&history).as_deref(), Some("v2.png"));
    }

    #[test]
    fn original_survives_every_append() {
        let mut history = EditHistory::new();
        history.seed(version(0));
        for tag in 1..6 {
            history.undo();
            history.append(version(tag));
        }
        assert_eq!(
            history.original().map(|v| v.image().name()),
            Some("v0.png")
        );
    }

    #[test]
    fn matches_reference_model_over_mixed_sequence() {
        // 'a' appends the next tag, 'u' undoes, 'r' redoes.
        let script = "aauaaruuuarraauurrrauaa";
        let mut history = EditHistory::new();
        let mut model = Model::default();
        history.seed(version(0));
        model.append(0);
        let mut next = 1u8;

        for step in script.chars() {
            match step {
                'a' => {
                    history.append(version(next));
                    model.append(next);
                    next += 1;
                }
                'u' => {
                    history.undo();
                    model.undo();
                }
                'r' => {
                    history.redo();
                    model.redo();
                }
                _ => unreachable!(),
            }
            assert_eq!(history.cursor(), Some(model.index));
            assert_eq!(history.len(), model.items.len());
            let expected = format!("v{}.png", model.items[model.index]);
            assert_eq!(current_tag(&history), Some(expected));
        }
    }
}
