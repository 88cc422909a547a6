use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use llm4re_core::{
    dataset::{evaluations_file_name, judgements_file_name, DEFAULT_RATING_SCALE},
    evaluate_dataset, helpers::format_dict, reparse_ratings, DatasetOutput, DatasetRun, EvalType,
};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod service;

use config::{Args, Command, PromptArgs, SINGLE_STEP};
use service::EvaluationService;

/// Requirements of a dataset file: a list of strings or of objects with a
/// `requirement` field
fn load_requirements(path: &Path) -> anyhow::Result<Vec<Value>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let items: Vec<Value> = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::String(_) => Ok(item),
            Value::Object(ref fields) => fields
                .get("requirement")
                .filter(|r| r.is_string())
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("entry {} of {} has no requirement", i, path.display())),
            other => anyhow::bail!("entry {} of {} is not a requirement: {}", i, path.display(), other),
        })
        .collect()
}

fn output_file(
    output_dir: &Path,
    dataset_name: &str,
    model: &str,
    eval_type: EvalType,
    prompt: &PromptArgs,
    judge_approach: &str,
) -> PathBuf {
    let name = match eval_type {
        EvalType::Evaluations => evaluations_file_name(dataset_name, model, prompt.approach()),
        EvalType::Judgements => judgements_file_name(dataset_name, model, prompt.approach(), judge_approach),
    };
    output_dir.join(format!("{}.json", name))
}

async fn run(command: Command, service: &EvaluationService) -> anyhow::Result<()> {
    match command {
        Command::Evaluate {
            requirement,
            prompt,
            judge,
            judge_approach,
        } => {
            let judge_approach = judge_approach.or_else(|| judge.then(|| SINGLE_STEP.to_string()));
            let generator = service.generator(&prompt, judge_approach.as_deref())?;
            let evaluation = generator.generate(&requirement).await?;
            if !evaluation.is_valid() {
                warn!(kind = %evaluation.kind(), info = ?evaluation.error().info, "Invalid evaluation");
            }
            println!("{}", format_dict(evaluation.content(), false));
            if generator.has_judge() {
                let judgement = generator.judge(evaluation).await?;
                println!("{}", format_dict(judgement.content(), false));
            }
        }
        Command::Dataset {
            input,
            output_dir,
            dataset_name,
            eval_type,
            prompt,
            judge_approach,
            stop_idx,
            recursion_limit,
            reparse,
        } => {
            let dataset_name = match dataset_name {
                Some(name) => name,
                None => input
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
                    .context("input file has no name")?,
            };
            let output_path = output_file(
                &output_dir,
                &dataset_name,
                &service.settings().model_name(),
                eval_type,
                &prompt,
                &judge_approach,
            );

            if reparse {
                let rated = reparse_ratings(&output_path, eval_type)?;
                info!(path = %output_path.display(), rated, "Reparsed {}", eval_type);
                return Ok(());
            }

            let (inputs, generator) = match eval_type {
                EvalType::Evaluations => (load_requirements(&input)?, service.generator(&prompt, None)?),
                EvalType::Judgements => (
                    DatasetOutput::load(&input, EvalType::Evaluations)?.entries,
                    service.generator(&prompt, Some(&judge_approach))?,
                ),
            };
            let run = DatasetRun::new(eval_type, &output_path)
                .with_stop_idx(stop_idx)
                .with_recursion_limit(recursion_limit)
                .with_rating_scale(DEFAULT_RATING_SCALE);
            let summary = evaluate_dataset(&generator, &inputs, &run).await?;
            info!(
                generated = summary.generated,
                failed = summary.failed,
                total_failed = summary.total_failed,
                "Wrote {}",
                output_path.display()
            );
            if let Some(reason) = summary.aborted {
                if summary.resumable {
                    anyhow::bail!("batch stopped early, run again to resume: {}", reason);
                }
                anyhow::bail!("batch stopped early: {}", reason);
            }
        }
        Command::Render {
            template,
            requirement,
            step,
            prompt,
        } => {
            let parts = service.render(&template, step, &prompt)?;
            if let Some(system) = &parts.system {
                println!("{}\n", system);
            }
            match requirement {
                Some(requirement) => println!("{}", parts.render_user(&requirement, None)),
                None => println!("{}", parts.user),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm4re=info,llm4re_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    // Load configuration
    let settings = config::Settings::load()?;
    info!(provider = %settings.provider, model = %settings.model_name(), "Starting llm4re");

    let service = EvaluationService::new(settings)?;
    run(args.command, &service).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_load_requirements_accepts_strings_and_objects() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reqs.json");
        std::fs::write(&path, r#"["The system shall log errors.", {"requirement": "R2", "id": 2}]"#).unwrap();
        let requirements = load_requirements(&path).unwrap();
        assert_eq!(requirements, vec![json!("The system shall log errors."), json!("R2")]);

        std::fs::write(&path, r#"[{"id": 3}]"#).unwrap();
        assert!(load_requirements(&path).is_err());
    }

    #[test]
    fn test_output_file_names() {
        let args = Args::parse_from(["llm4re", "evaluate", "R", "--approach", "basic"]);
        let Command::Evaluate { prompt, .. } = args.command else {
            panic!("expected evaluate");
        };
        let path = output_file(Path::new("out"), "PROMISE", "gpt-4o", EvalType::Judgements, &prompt, "judge_chain");
        assert_eq!(
            path,
            Path::new("out").join("judge_chain_judgements_of_basic_evaluations_of_PROMISE_by_gpt_4o.json")
        );
    }
}
