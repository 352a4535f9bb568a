use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::commands::{speech, story, vocab};
use crate::persistence;
use crate::platform;
use crate::speech::{PlaybackState, SpeechSequencer, StartHint};
use crate::state::{AppState, Settings};
use crate::vocab::{JsonVocabularyStore, NewWord, WordEntry};

/// Vocabulary stories, generated from your own words and read aloud.
#[derive(Debug, Parser)]
#[command(name = "lexitale", version, about)]
pub struct Cli {
    /// Vocabulary file to use instead of the configured one
    #[arg(long, global = true)]
    pub vocabulary: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import words from a CSV file (word, translation, transcription, example).
    Import { file: PathBuf },
    /// List or search the dictionary.
    Words(WordsArgs),
    /// Add a word.
    Add(AddArgs),
    /// Change fields of an existing word.
    Edit(EditArgs),
    /// Remove a word.
    Delete { id: u64 },
    /// Generate a story from the words due for review.
    Story(StoryArgs),
    /// Read words aloud in a loop until Ctrl-C.
    Drill(DrillArgs),
    /// Read text aloud sentence by sentence.
    Speak(SpeakArgs),
    /// Show or change stored settings.
    Settings(SettingsArgs),
}

#[derive(Debug, Args)]
pub struct WordsArgs {
    /// Only words whose word or translation contains this text
    #[arg(long)]
    pub search: Option<String>,
    /// Show the words the next story would use
    #[arg(long, conflicts_with = "search")]
    pub due: bool,
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    pub word: String,
    pub translation: String,
    #[arg(long, default_value = "")]
    pub transcription: String,
    #[arg(long, default_value = "")]
    pub example: String,
}

#[derive(Debug, Args)]
pub struct EditArgs {
    pub id: u64,
    #[arg(long)]
    pub word: Option<String>,
    #[arg(long)]
    pub translation: Option<String>,
    #[arg(long)]
    pub transcription: Option<String>,
    #[arg(long)]
    pub example: Option<String>,
}

#[derive(Debug, Args)]
pub struct StoryArgs {
    /// What the story should be about
    #[arg(long, default_value = "")]
    pub context: String,
    /// Attempt budget for this run
    #[arg(long)]
    pub attempts: Option<u32>,
    /// Also print a translation
    #[arg(long)]
    pub translate: bool,
    /// Read the story aloud afterwards, then the translation if requested
    #[arg(long)]
    pub speak: bool,
    /// Sentence to start reading from
    #[arg(long, requires = "speak")]
    pub from_sentence: Option<usize>,
}

#[derive(Debug, Args)]
pub struct DrillArgs {
    /// Words to drill; defaults to the words due for review
    pub words: Vec<String>,
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
    #[command(flatten)]
    pub voice: VoiceArgs,
}

#[derive(Debug, Args)]
pub struct SpeakArgs {
    pub text: String,
    #[arg(long)]
    pub from_sentence: Option<usize>,
    /// Start at the sentence with this text
    #[arg(long, conflicts_with = "from_sentence")]
    pub from_text: Option<String>,
    #[command(flatten)]
    pub voice: VoiceArgs,
}

/// Voice overrides for one run; they also become the session's settings.
#[derive(Debug, Default, Args)]
pub struct VoiceArgs {
    /// Speech rate, 0.25 to 4.0
    #[arg(long)]
    pub rate: Option<f32>,
    /// Speech locale such as en-GB
    #[arg(long)]
    pub locale: Option<String>,
}

impl VoiceArgs {
    fn apply(&self, state: &AppState, sequencer: &SpeechSequencer) -> Result<()> {
        if let Some(rate) = self.rate {
            speech::do_set_speech_rate(state, sequencer, rate)?;
        }
        if let Some(locale) = &self.locale {
            speech::do_set_speech_language(state, sequencer, locale)?;
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct SettingsArgs {
    #[arg(long)]
    pub api_key: Option<String>,
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long)]
    pub attempts: Option<u32>,
    #[arg(long)]
    pub story_language: Option<String>,
    #[arg(long)]
    pub translation_language: Option<String>,
    #[arg(long)]
    pub rate: Option<f32>,
    #[arg(long)]
    pub locale: Option<String>,
    /// Locale for reading translations aloud
    #[arg(long)]
    pub translation_locale: Option<String>,
}

impl SettingsArgs {
    fn is_empty(&self) -> bool {
        self.api_key.is_none()
            && self.model.is_none()
            && self.attempts.is_none()
            && self.story_language.is_none()
            && self.translation_language.is_none()
            && self.rate.is_none()
            && self.locale.is_none()
            && self.translation_locale.is_none()
    }

    fn apply(self, settings: &mut Settings) {
        if let Some(key) = self.api_key {
            settings.generation.api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Some(model) = self.model {
            settings.generation.model = model;
        }
        if let Some(attempts) = self.attempts {
            settings.generation.max_attempts = attempts;
        }
        if let Some(language) = self.story_language {
            settings.generation.story_language = language;
        }
        if let Some(language) = self.translation_language {
            settings.generation.translation_language = language;
        }
        if let Some(rate) = self.rate {
            settings.speech.rate = crate::speech::machine::clamp_rate(rate);
        }
        if let Some(locale) = self.locale {
            settings.speech.locale = locale;
        }
        if let Some(locale) = self.translation_locale {
            settings.speech.translation_locale = locale;
        }
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Could not listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Sentence to pass to `--from-sentence` when reading stopped early.
fn resume_point(state: &PlaybackState) -> Option<usize> {
    let index = state.highlighted_sentence()?;
    (index + 1 < state.unit_count).then_some(index)
}

fn print_resume_hint(state: &PlaybackState) {
    if let Some(index) = resume_point(state) {
        println!("Stopped at sentence {}; continue with --from-sentence {}", index, index);
    }
}

fn print_words(words: &[WordEntry]) {
    if words.is_empty() {
        println!("No words.");
        return;
    }
    for w in words {
        let last_used = w
            .last_used_at
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!("{:>5}  {:<24} {:<24} used: {}", w.id, w.word, w.translation, last_used);
    }
}

pub async fn dispatch(cli: Cli) -> Result<()> {
    let settings_path = persistence::settings_path()?;

    if let Commands::Settings(args) = cli.command {
        return handle_settings(&settings_path, args);
    }

    let settings = persistence::load_with_env(&settings_path);
    let vocabulary_path = match cli.vocabulary.or_else(|| settings.vocabulary.path.clone()) {
        Some(path) => path,
        None => persistence::default_vocabulary_path()?,
    };
    let store = JsonVocabularyStore::open(&vocabulary_path)
        .with_context(|| format!("Failed to open vocabulary {}", vocabulary_path.display()))?;
    let state = Arc::new(AppState::new(settings, Arc::new(store)));

    match cli.command {
        Commands::Import { file } => {
            let summary = vocab::do_import_csv(&state, &file)?;
            println!("{} new, {} updated", summary.inserted, summary.updated);
        }
        Commands::Words(args) => {
            let words = if args.due {
                vocab::do_due_words(&state, args.limit)?
            } else {
                let mut words = vocab::do_list_words(&state, args.search.as_deref())?;
                words.truncate(args.limit);
                words
            };
            print_words(&words);
        }
        Commands::Add(args) => {
            let entry = vocab::do_add_word(
                &state,
                NewWord {
                    word: args.word,
                    translation: args.translation,
                    transcription: args.transcription,
                    example: args.example,
                },
            )?;
            println!("Added #{} {}", entry.id, entry.word);
        }
        Commands::Edit(args) => {
            let patch = vocab::WordPatch {
                word: args.word,
                translation: args.translation,
                transcription: args.transcription,
                example: args.example,
            };
            let entry = vocab::do_edit_word(&state, args.id, patch)?;
            print_words(std::slice::from_ref(&entry));
        }
        Commands::Delete { id } => {
            vocab::do_delete_word(&state, id)?;
            println!("Deleted #{}", id);
        }
        Commands::Story(args) => handle_story(&state, args).await?,
        Commands::Drill(args) => {
            let words = if args.words.is_empty() {
                vocab::do_due_words(&state, args.limit)?
                    .into_iter()
                    .map(|e| e.word)
                    .collect()
            } else {
                args.words
            };
            let sequencer = speech::start_sequencer(&state.settings(), platform::default_speech_backend());
            args.voice.apply(&state, &sequencer)?;
            println!("Drilling {} words, Ctrl-C to stop", words.len());
            let result = speech::do_drill_words(&state, &sequencer, words, ctrl_c()).await;
            sequencer.shutdown().await;
            result?;
        }
        Commands::Speak(args) => {
            let hint = StartHint {
                sentence_index: args.from_sentence,
                highlighted_sentence: args.from_text,
                carried_index: None,
            };
            let sequencer = speech::start_sequencer(&state.settings(), platform::default_speech_backend());
            args.voice.apply(&state, &sequencer)?;
            let result = speech::do_read_text(&state, &sequencer, &args.text, hint, ctrl_c()).await;
            sequencer.shutdown().await;
            print_resume_hint(&result?);
        }
        Commands::Settings(_) => {}
    }
    Ok(())
}

async fn handle_story(state: &Arc<AppState>, args: StoryArgs) -> Result<()> {
    let settings = state.settings();
    let backend = story::generation_backend(&settings)?;
    let generator = story::build_generator(&settings, backend, Arc::clone(&state.store));

    let canceller = Arc::clone(state);
    let cancel_task = tokio::spawn(async move {
        ctrl_c().await;
        story::do_cancel_generation(&canceller);
    });
    let result = story::do_generate_story(state, &generator, &args.context, args.attempts).await;
    cancel_task.abort();

    let session = story::do_open_session(state, result?);
    let story = session.story();
    for (i, sentence) in story.sentences().iter().enumerate() {
        println!("{:>3}. {}", i, sentence);
    }
    println!("\nWords used: {}", story.covered_words.join(", "));

    let translated = if args.translate {
        let translated = story::do_translate_story(&generator, &session).await?;
        println!("\n[{}]", translated.language);
        for (i, sentence) in translated.sentences().iter().enumerate() {
            println!("{:>3}. {}", i, sentence);
        }
        Some(translated)
    } else {
        None
    };

    if args.speak {
        let hint = args.from_sentence.map(StartHint::at).unwrap_or_default();
        let sequencer = speech::start_sequencer(&settings, platform::default_speech_backend());
        let result = read_story(state, &sequencer, &story.clean_text, hint, translated).await;
        sequencer.shutdown().await;
        result?;
    }
    Ok(())
}

/// Read the story, then its translation unless the reader stopped early.
async fn read_story(
    state: &AppState,
    sequencer: &SpeechSequencer,
    text: &str,
    hint: StartHint,
    translated: Option<&crate::story::TranslatedStory>,
) -> Result<()> {
    let done = speech::do_read_text(state, sequencer, text, hint, ctrl_c()).await?;
    if resume_point(&done).is_some() {
        print_resume_hint(&done);
        return Ok(());
    }
    if let Some(translated) = translated {
        println!("Reading the {} translation", translated.language);
        let done = speech::do_read_translation(state, sequencer, translated, ctrl_c()).await?;
        print_resume_hint(&done);
    }
    Ok(())
}

fn handle_settings(path: &std::path::Path, args: SettingsArgs) -> Result<()> {
    let mut settings = persistence::load_settings(path);
    if !args.is_empty() {
        args.apply(&mut settings);
        persistence::save_settings(path, &settings);
        tracing::info!("Settings saved to {}", path.display());
    }

    let mut shown = settings;
    if let Some(key) = shown.generation.api_key.as_mut() {
        *key = mask(key);
    }
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}

fn mask(secret: &str) -> String {
    let tail: String = secret.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("****{}", tail)
}
