//! Search view-state
//!
//! One mutable record mediating between user input and the lookup service.
//! Lookups run on the blocking pool; completed lookups are applied to the
//! state only if no newer interaction has been issued in the meantime, so
//! the last-issued request wins rather than the last-completed one.

use crate::error::LexicaError;
use crate::store::{Lookup, Verse, Word, DEFAULT_VERSE_PAGE};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionState {
    pub search_term: String,
    pub word_results: Vec<Word>,
    pub verses: Vec<Verse>,
    pub selected_word: Option<String>,
    pub is_loading: bool,
    pub error: Option<String>,
    /// True when the last verse page came back full, i.e. another page may
    /// exist for the current selection.
    pub more_verses: bool,
}

/// Where the session currently is, derived from the flags rather than
/// stored, so the record cannot disagree with itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    SearchingWords,
    WordsShown,
    SearchingVerses,
    VersesShown,
    Error,
}

impl SessionState {
    pub fn phase(&self) -> Phase {
        if self.error.is_some() {
            Phase::Error
        } else if self.search_term.is_empty() {
            Phase::Idle
        } else if self.selected_word.is_some() {
            if self.is_loading {
                Phase::SearchingVerses
            } else {
                Phase::VersesShown
            }
        } else if self.is_loading {
            Phase::SearchingWords
        } else {
            Phase::WordsShown
        }
    }
}

pub struct SearchSession<L> {
    lookup: Arc<L>,
    state: Mutex<SessionState>,
    generation: AtomicU64,
    verse_page: usize,
}

impl<L: Lookup + 'static> SearchSession<L> {
    pub fn new(lookup: Arc<L>) -> Self {
        Self {
            lookup,
            state: Mutex::new(SessionState::default()),
            generation: AtomicU64::new(0),
            verse_page: DEFAULT_VERSE_PAGE,
        }
    }

    pub fn with_verse_page(mut self, verse_page: usize) -> Self {
        self.verse_page = verse_page.max(1);
        self
    }

    pub fn snapshot(&self) -> SessionState {
        self.lock().clone()
    }

    /// Input changed. Empty text resets the session without touching the
    /// store; non-empty text clears any selection and fetches candidates
    /// for the lowercased term.
    pub async fn handle_search(&self, text: &str) -> Result<(), LexicaError> {
        let generation = self.next_generation();
        {
            let mut st = self.lock();
            st.search_term = text.to_string();
            st.verses.clear();
            st.selected_word = None;
            st.more_verses = false;
            if text.is_empty() {
                st.word_results.clear();
                st.is_loading = false;
                st.error = None;
                return Ok(());
            }
            st.is_loading = true;
        }

        let partial = text.to_lowercase();
        let lookup = Arc::clone(&self.lookup);
        let outcome = task::spawn_blocking(move || lookup.find_words(&partial))
            .await
            .map_err(|e| LexicaError::Task(e.to_string()))?;

        self.apply(generation, |st| {
            st.is_loading = false;
            match outcome {
                Ok(words) => {
                    st.word_results = words;
                    st.error = None;
                }
                Err(e) => {
                    tracing::error!(error = %e, "word search failed");
                    st.error = Some(e.to_string());
                }
            }
        });
        Ok(())
    }

    /// Candidate selected: the candidate list collapses and the first verse
    /// page for the word is fetched. The search field takes the word.
    pub async fn handle_word_select(&self, word: &str) -> Result<(), LexicaError> {
        let generation = self.next_generation();
        {
            let mut st = self.lock();
            st.selected_word = Some(word.to_string());
            st.search_term = word.to_string();
            st.word_results.clear();
            st.verses.clear();
            st.more_verses = false;
            st.is_loading = true;
        }
        self.fetch_verses(generation, word.to_string(), 0).await
    }

    /// Fetch the next verse page for the current selection. A no-op unless
    /// a word is selected and the last page came back full.
    pub async fn load_more_verses(&self) -> Result<(), LexicaError> {
        let (word, offset) = {
            let st = self.lock();
            match (&st.selected_word, st.more_verses) {
                (Some(word), true) => (word.clone(), st.verses.len()),
                _ => return Ok(()),
            }
        };
        let generation = self.next_generation();
        self.lock().is_loading = true;
        self.fetch_verses(generation, word, offset).await
    }

    async fn fetch_verses(
        &self,
        generation: u64,
        word: String,
        offset: usize,
    ) -> Result<(), LexicaError> {
        let lookup = Arc::clone(&self.lookup);
        let page = self.verse_page;
        let outcome = task::spawn_blocking(move || lookup.find_verses(&word, page, offset))
            .await
            .map_err(|e| LexicaError::Task(e.to_string()))?;

        self.apply(generation, |st| {
            st.is_loading = false;
            match outcome {
                Ok(batch) => {
                    st.more_verses = batch.len() == page;
                    st.verses.extend(batch);
                    st.error = None;
                }
                Err(e) => {
                    tracing::error!(error = %e, "verse search failed");
                    st.error = Some(e.to_string());
                }
            }
        });
        Ok(())
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Mutate the state only if `generation` is still the latest issued
    /// interaction; a superseded lookup's result is dropped on the floor.
    fn apply(&self, generation: u64, f: impl FnOnce(&mut SessionState)) -> bool {
        let mut st = self.lock();
        if generation != self.generation.load(Ordering::SeqCst) {
            tracing::debug!(generation, "discarding stale lookup result");
            return false;
        }
        f(&mut st);
        true
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn word(text: &str) -> Word {
        Word {
            text: text.to_string(),
        }
    }

    fn verse(reference: &str, text: &str) -> Verse {
        Verse {
            reference: reference.to_string(),
            text: text.to_string(),
        }
    }

    /// Canned lookup: records queried partials, can be told to fail.
    struct FakeLookup {
        words: Vec<Word>,
        verses: Vec<Verse>,
        fail: std::sync::atomic::AtomicBool,
        seen_partials: Mutex<Vec<String>>,
    }

    impl FakeLookup {
        fn new(words: Vec<Word>, verses: Vec<Verse>) -> Self {
            Self {
                words,
                verses,
                fail: std::sync::atomic::AtomicBool::new(false),
                seen_partials: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            let lookup = Self::new(Vec::new(), Vec::new());
            lookup.fail.store(true, Ordering::SeqCst);
            lookup
        }
    }

    impl Lookup for FakeLookup {
        fn find_words(&self, partial: &str) -> Result<Vec<Word>, LexicaError> {
            self.seen_partials.lock().unwrap().push(partial.to_string());
            if self.fail.load(Ordering::SeqCst) {
                return Err(LexicaError::InvalidQuery("boom".to_string()));
            }
            Ok(self.words.clone())
        }

        fn find_verses(
            &self,
            _word: &str,
            limit: usize,
            offset: usize,
        ) -> Result<Vec<Verse>, LexicaError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(LexicaError::InvalidQuery("boom".to_string()));
            }
            Ok(self
                .verses
                .iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect())
        }
    }

    /// First find_words call signals entry then blocks until released;
    /// every call echoes its partial back as the sole candidate.
    struct GatedLookup {
        entered: Mutex<Option<mpsc::Sender<()>>>,
        release: Mutex<Option<mpsc::Receiver<()>>>,
        calls: AtomicUsize,
    }

    impl Lookup for GatedLookup {
        fn find_words(&self, partial: &str) -> Result<Vec<Word>, LexicaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let entered = self.entered.lock().unwrap().take();
            if let Some(tx) = entered {
                tx.send(()).ok();
                let release = self.release.lock().unwrap().take();
                if let Some(rx) = release {
                    rx.recv().ok();
                }
            }
            Ok(vec![word(partial)])
        }

        fn find_verses(
            &self,
            _word: &str,
            _limit: usize,
            _offset: usize,
        ) -> Result<Vec<Verse>, LexicaError> {
            Ok(Vec::new())
        }
    }

    fn session_with(lookup: FakeLookup) -> SearchSession<FakeLookup> {
        SearchSession::new(Arc::new(lookup))
    }

    #[tokio::test]
    async fn search_populates_word_candidates() {
        let session = session_with(FakeLookup::new(
            vec![word("λόγος"), word("λόγον")],
            Vec::new(),
        ));
        session.handle_search("λογ").await.unwrap();

        let st = session.snapshot();
        assert_eq!(st.search_term, "λογ");
        assert_eq!(st.word_results, vec![word("λόγος"), word("λόγον")]);
        assert!(st.verses.is_empty());
        assert!(!st.is_loading);
        assert_eq!(st.phase(), Phase::WordsShown);
    }

    #[tokio::test]
    async fn search_lowercases_the_term_before_lookup() {
        let lookup = Arc::new(FakeLookup::new(vec![word("λόγος")], Vec::new()));
        let session = SearchSession::new(Arc::clone(&lookup));
        session.handle_search("ΛΟΓ").await.unwrap();

        assert_eq!(
            *lookup.seen_partials.lock().unwrap(),
            vec!["λογ".to_string()]
        );
        assert_eq!(session.snapshot().search_term, "ΛΟΓ");
    }

    #[tokio::test]
    async fn clearing_input_resets_everything_without_a_lookup() {
        let lookup = Arc::new(FakeLookup::new(
            vec![word("λόγος")],
            vec![verse("JHN 1:1", "ὁ λόγος")],
        ));
        let session = SearchSession::new(Arc::clone(&lookup));
        session.handle_search("λογ").await.unwrap();
        session.handle_word_select("λόγος").await.unwrap();

        session.handle_search("").await.unwrap();

        let st = session.snapshot();
        assert_eq!(st.search_term, "");
        assert!(st.word_results.is_empty());
        assert!(st.verses.is_empty());
        assert_eq!(st.selected_word, None);
        assert_eq!(st.phase(), Phase::Idle);
        // the reset itself issued no query
        assert_eq!(lookup.seen_partials.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn selecting_a_word_collapses_candidates_and_loads_verses() {
        let session = session_with(FakeLookup::new(
            vec![word("λόγος")],
            vec![verse("JHN 1:1", "ὁ λόγος"), verse("JHN 1:14", "Καὶ ὁ λόγος")],
        ));
        session.handle_search("λογ").await.unwrap();
        session.handle_word_select("λόγος").await.unwrap();

        let st = session.snapshot();
        assert_eq!(st.search_term, "λόγος");
        assert_eq!(st.selected_word.as_deref(), Some("λόγος"));
        assert!(st.word_results.is_empty());
        assert_eq!(st.verses.len(), 2);
        assert_eq!(st.phase(), Phase::VersesShown);
    }

    #[tokio::test]
    async fn failed_lookup_sets_error_and_keeps_prior_results() {
        let lookup = Arc::new(FakeLookup::new(vec![word("λόγος")], Vec::new()));
        let session = SearchSession::new(Arc::clone(&lookup));
        session.handle_search("λογ").await.unwrap();

        lookup.fail.store(true, Ordering::SeqCst);
        session.handle_search("λογο").await.unwrap();

        let st = session.snapshot();
        assert!(st.error.is_some());
        assert!(!st.is_loading);
        assert_eq!(st.phase(), Phase::Error);
        assert_eq!(st.word_results, vec![word("λόγος")]);
    }

    #[tokio::test]
    async fn error_clears_on_reset() {
        let session = session_with(FakeLookup::failing());
        session.handle_search("λογ").await.unwrap();
        assert_eq!(session.snapshot().phase(), Phase::Error);

        session.handle_search("").await.unwrap();
        let st = session.snapshot();
        assert_eq!(st.error, None);
        assert_eq!(st.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn verse_pages_append_until_exhausted() {
        let verses: Vec<Verse> = (1..=60)
            .map(|i| verse(&format!("JHN 1:{i}"), "ὁ λόγος"))
            .collect();
        let session =
            SearchSession::new(Arc::new(FakeLookup::new(Vec::new(), verses))).with_verse_page(25);

        session.handle_word_select("λόγος").await.unwrap();
        let st = session.snapshot();
        assert_eq!(st.verses.len(), 25);
        assert!(st.more_verses);

        session.load_more_verses().await.unwrap();
        assert_eq!(session.snapshot().verses.len(), 50);

        session.load_more_verses().await.unwrap();
        let st = session.snapshot();
        assert_eq!(st.verses.len(), 60);
        assert!(!st.more_verses);

        // exhausted: further calls are no-ops
        session.load_more_verses().await.unwrap();
        assert_eq!(session.snapshot().verses.len(), 60);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stale_word_results_are_discarded() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let lookup = Arc::new(GatedLookup {
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(Some(release_rx)),
            calls: AtomicUsize::new(0),
        });
        let session = Arc::new(SearchSession::new(Arc::clone(&lookup)));

        // first query blocks inside the store
        let slow = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.handle_search("λο").await })
        };
        entered_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .unwrap();

        // a newer keystroke completes while the first is still pending
        session.handle_search("λογ").await.unwrap();
        assert_eq!(session.snapshot().word_results, vec![word("λογ")]);

        // the old response arrives late and must not overwrite newer state
        release_tx.send(()).unwrap();
        slow.await.unwrap().unwrap();
        let st = session.snapshot();
        assert_eq!(st.word_results, vec![word("λογ")]);
        assert_eq!(st.search_term, "λογ");
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pending_lookup_cannot_resurrect_a_cleared_session() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let lookup = Arc::new(GatedLookup {
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(Some(release_rx)),
            calls: AtomicUsize::new(0),
        });
        let session = Arc::new(SearchSession::new(lookup));

        let slow = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.handle_search("λο").await })
        };
        entered_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .unwrap();

        session.handle_search("").await.unwrap();
        release_tx.send(()).unwrap();
        slow.await.unwrap().unwrap();

        let st = session.snapshot();
        assert!(st.word_results.is_empty());
        assert_eq!(st.phase(), Phase::Idle);
    }
}
