//! Question bank collaborator.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::types::{CompanyId, Difficulty, Question, QuestionId};

/// Filter for a candidate fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateQuery {
    pub company_id: CompanyId,
    /// `None` broadens the fetch across every difficulty.
    pub difficulty: Option<Difficulty>,
    pub exclude: Vec<QuestionId>,
    pub limit: usize,
}

/// Source of quiz questions.
#[async_trait]
pub trait QuestionBank: Send + Sync {
    async fn fetch_candidates(&self, query: &CandidateQuery) -> Result<Vec<Question>>;
}

/// Question bank backed by a vector, scoped per company.
#[derive(Debug, Default)]
pub struct InMemoryQuestionBank {
    questions: RwLock<Vec<(CompanyId, Question)>>,
}

impl InMemoryQuestionBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bank holding `questions` for one company.
    pub fn with_questions(company_id: impl Into<CompanyId>, questions: Vec<Question>) -> Self {
        let company_id = company_id.into();
        Self {
            questions: RwLock::new(
                questions
                    .into_iter()
                    .map(|q| (company_id.clone(), q))
                    .collect(),
            ),
        }
    }

    pub async fn add(&self, company_id: impl Into<CompanyId>, question: Question) {
        self.questions
            .write()
            .await
            .push((company_id.into(), question));
    }
}

#[async_trait]
impl QuestionBank for InMemoryQuestionBank {
    async fn fetch_candidates(&self, query: &CandidateQuery) -> Result<Vec<Question>> {
        let questions = self.questions.read().await;
        Ok(questions
            .iter()
            .filter(|(company, _)| company == &query.company_id)
            .map(|(_, q)| q)
            .filter(|q| query.difficulty.is_none_or(|d| q.difficulty == d))
            .filter(|q| !query.exclude.contains(&q.id))
            .take(query.limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QuestionType;

    fn question(id: &str, difficulty: Difficulty) -> Question {
        Question {
            id: QuestionId::from(id),
            text: format!("Question {id}"),
            question_type: QuestionType::TrueFalse,
            options: vec!["true".into(), "false".into()],
            correct_answer: "true".into(),
            difficulty,
            topic: "safety".into(),
            hint: None,
            explanation: None,
        }
    }

    fn query(difficulty: Option<Difficulty>, exclude: &[&str], limit: usize) -> CandidateQuery {
        CandidateQuery {
            company_id: CompanyId::from("acme"),
            difficulty,
            exclude: exclude.iter().map(|id| QuestionId::from(*id)).collect(),
            limit,
        }
    }

    #[tokio::test]
    async fn filters_by_difficulty_exclusion_and_limit() {
        let bank = InMemoryQuestionBank::with_questions(
            "acme",
            vec![
                question("q1", Difficulty::Basic),
                question("q2", Difficulty::Basic),
                question("q3", Difficulty::Basic),
                question("q4", Difficulty::Advanced),
            ],
        );

        let found = bank
            .fetch_candidates(&query(Some(Difficulty::Basic), &["q1"], 1))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id.as_str(), "q2");

        let all = bank.fetch_candidates(&query(None, &[], 10)).await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn scopes_by_company() {
        let bank = InMemoryQuestionBank::new();
        bank.add("other", question("q1", Difficulty::Basic)).await;

        let found = bank.fetch_candidates(&query(None, &[], 10)).await.unwrap();
        assert!(found.is_empty());
    }
}
