use tally_common::TweetId;
use uuid::Uuid;

/// Stats from a pipeline run.
#[derive(Debug, Default)]
pub struct RunStats {
    pub run_id: Uuid,
    pub mentions_fetched: usize,
    pub target_posts_fetched: usize,
    pub quotes_fetched: usize,
    pub candidates: usize,
    pub rejected_by_filter: Vec<(String, usize)>,
    pub mention_discards: usize,
    pub deferred: usize,
    pub kept: usize,
    pub dataset_rows: usize,
    pub scored: usize,
    pub unavailable: usize,
    pub capped: usize,
    pub rate_limited: bool,
    pub cutoffs_advanced: Vec<(String, TweetId)>,
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Tally Run Complete ({}) ===", self.run_id)?;
        writeln!(f, "Mentions fetched:   {}", self.mentions_fetched)?;
        writeln!(f, "Target posts:       {}", self.target_posts_fetched)?;
        writeln!(f, "Quotes fetched:     {}", self.quotes_fetched)?;
        writeln!(f, "Unique candidates:  {}", self.candidates)?;
        if !self.rejected_by_filter.is_empty() {
            writeln!(f, "\nRejected by filter:")?;
            for (name, count) in &self.rejected_by_filter {
                writeln!(f, "  {name}: {count}")?;
            }
        }
        writeln!(f, "\nMention discards:   {}", self.mention_discards)?;
        writeln!(f, "Deferred:           {}", self.deferred)?;
        writeln!(f, "Kept:               {}", self.kept)?;
        writeln!(f, "\nDataset rows:       {}", self.dataset_rows)?;
        writeln!(f, "  Scored:           {}", self.scored)?;
        writeln!(f, "  Unavailable:      {}", self.unavailable)?;
        writeln!(f, "  Over quota:       {}", self.capped)?;
        if self.cutoffs_advanced.is_empty() {
            writeln!(f, "\nCutoffs unchanged")?;
        } else {
            writeln!(f, "\nCutoffs advanced:")?;
            for (key, id) in &self.cutoffs_advanced {
                writeln!(f, "  {key} -> {id}")?;
            }
        }
        if self.rate_limited {
            writeln!(
                f,
                "\nNote: API quota exhausted; results are partial and cutoffs for the \
                 affected categories were left in place."
            )?;
        }
        if self.deferred > 0 {
            writeln!(
                f,
                "Note: {} replies were deferred; no cutoff moved so they are fetched again.",
                self.deferred
            )?;
        }
        Ok(())
    }
}
