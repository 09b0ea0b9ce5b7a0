// Screen stack - Library is always at the bottom

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Library,
    BookDetail { book_id: String },
    AudioPlayer { book_id: String, chapter_id: Option<String> },
    Reader { book_id: String, location: Option<String> },
    Settings,
}

impl Screen {
    pub fn title(&self) -> &'static str {
        match self {
            Screen::Library => "Library",
            Screen::BookDetail { .. } => "Book",
            Screen::AudioPlayer { .. } => "Now Playing",
            Screen::Reader { .. } => "Reader",
            Screen::Settings => "Settings",
        }
    }
}

#[derive(Debug)]
pub struct Navigator {
    stack: Vec<Screen>,
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator {
    pub fn new() -> Self {
        Self {
            stack: vec![Screen::Library],
        }
    }

    pub fn current(&self) -> &Screen {
        // the root is never popped
        &self.stack[self.stack.len() - 1]
    }

    pub fn push(&mut self, screen: Screen) {
        self.stack.push(screen);
    }

    /// Pops the top screen. Returns the popped screen, or `None` at the root.
    pub fn back(&mut self) -> Option<Screen> {
        if self.stack.len() > 1 {
            self.stack.pop()
        } else {
            None
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// "Library > Book > Now Playing"
    pub fn breadcrumb(&self) -> String {
        self.stack
            .iter()
            .map(|s| s.title())
            .collect::<Vec<_>>()
            .join(" > ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_back_never_pops_root() {
        let mut nav = Navigator::new();
        assert_eq!(nav.back(), None);
        assert_eq!(nav.current(), &Screen::Library);
        assert_eq!(nav.depth(), 1);
    }

    #[test]
    fn test_push_and_back() {
        let mut nav = Navigator::new();
        nav.push(Screen::BookDetail {
            book_id: "b".to_string(),
        });
        nav.push(Screen::AudioPlayer {
            book_id: "b".to_string(),
            chapter_id: None,
        });
        assert_eq!(nav.breadcrumb(), "Library > Book > Now Playing");

        assert!(matches!(nav.back(), Some(Screen::AudioPlayer { .. })));
        assert!(matches!(nav.current(), Screen::BookDetail { book_id } if book_id == "b"));
        nav.back();
        assert_eq!(nav.back(), None);
    }
}
