/// Whether a forward pass updates batch-norm running statistics.
///
/// `Train` normalises with batch statistics and writes the running averages,
/// `Eval` reads the stored running averages only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Train,
    #[default]
    Eval,
}

impl Mode {
    pub fn is_train(self) -> bool {
        matches!(self, Mode::Train)
    }
}

impl From<bool> for Mode {
    fn from(train: bool) -> Self {
        if train {
            Mode::Train
        } else {
            Mode::Eval
        }
    }
}
