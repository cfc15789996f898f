use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use nimbus_core::job::Job;
use nimbus_core::specification::Specification;
use nimbus_core::JobId;

fn default_count() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TaskDef {
    pub spec: Specification,
    /// Shell commands executed one after another on the granted resource.
    #[serde(default)]
    pub commands: Vec<String>,
    /// Number of identical tasks created from this definition.
    #[serde(default = "default_count")]
    pub count: u32,
}

/// Contents of a job file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct JobDef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<TaskDef>,
}

impl JobDef {
    fn validate(&self) -> anyhow::Result<()> {
        if self.tasks.is_empty() {
            anyhow::bail!("Job has to contain at least one task");
        }
        for (index, task) in self.tasks.iter().enumerate() {
            if task.count == 0 {
                anyhow::bail!("Task definition {index} has zero count");
            }
            task.spec
                .parse_requirements()
                .with_context(|| format!("Task definition {index} has an invalid requirement"))?;
        }
        Ok(())
    }

    pub fn parse(text: &str) -> anyhow::Result<JobDef> {
        let jdef: JobDef = toml::from_str(text)?;
        jdef.validate()?;
        Ok(jdef)
    }

    /// Reads a job file. A job without a name is named after the file.
    pub fn load(path: &Path) -> anyhow::Result<JobDef> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read job file {}", path.display()))?;
        let mut jdef =
            Self::parse(&text).with_context(|| format!("Invalid job file {}", path.display()))?;
        if jdef.name.is_empty() {
            jdef.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "job".to_string());
        }
        Ok(jdef)
    }

    pub fn task_count(&self) -> u32 {
        self.tasks.iter().map(|task| task.count).sum()
    }

    pub fn into_job(self, job_id: JobId) -> Job {
        let job = Job::new(job_id, self.name);
        for task in self.tasks {
            for _ in 0..task.count {
                job.add_task(task.spec.clone(), task.commands.clone());
            }
        }
        job
    }
}
