use crate::model::{QuestionReport, QuestionStatus};

pub fn print_summary(reports: &[QuestionReport]) {
    let mut evaluated = 0;
    let mut generated = 0;
    let mut exhausted = 0;
    let mut failed = 0;
    let mut valid = 0;

    for r in reports {
        match r.status {
            QuestionStatus::Evaluated => {
                evaluated += 1;
                if r.evaluation.as_ref().is_some_and(|e| e.valid) {
                    valid += 1;
                } else {
                    eprintln!("EMPTY [{}]: prediction returned no rows", r.question.id);
                }
            }
            QuestionStatus::Generated => generated += 1,
            QuestionStatus::Exhausted => {
                exhausted += 1;
                eprintln!(
                    "EXHAUSTED [{}]: no valid SQL after {} attempts",
                    r.question.id,
                    r.attempts.len()
                );
            }
            QuestionStatus::Failed => {
                failed += 1;
                let msg = r
                    .failure
                    .as_ref()
                    .map(|f| format!("{}: {}", f.kind, f.message))
                    .unwrap_or_default();
                eprintln!("FAILED [{}]: {}", r.question.id, msg);
            }
        }
    }

    eprintln!(
        "Questions: total={} evaluated={} valid={} generated={} exhausted={} failed={}",
        reports.len(),
        evaluated,
        valid,
        generated,
        exhausted,
        failed
    );
}
