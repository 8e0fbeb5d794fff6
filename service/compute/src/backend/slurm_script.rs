use domain_compute::exception::{ComputeException, ComputeResult};
use handlebars::Handlebars;
use serde_json::json;

const GROUP_SCRIPT: &str = "#!/bin/bash\n\
{{#each commands}}if [ \"$SLURM_PROCID\" = \"{{@index}}\" ]; then\n    {{{this}}}\nfi\n{{/each}}";

/// Script run by every task of a group allocation. Task `i` runs only the
/// `i`-th command.
pub fn render_group_script(commands: &[String]) -> anyhow::Result<String> {
    let handlebars = Handlebars::new();
    Ok(handlebars.render_template(GROUP_SCRIPT, &json!({ "commands": commands }))?)
}

/// Scheduler wall-clock limit as `D-HH:MM:SS`, rounding seconds up.
pub fn format_time_limit(time_limit_sec: f64) -> ComputeResult<String> {
    if !(time_limit_sec.is_finite() && time_limit_sec > 0.0) {
        return Err(ComputeException::InvalidTimeLimit { time_limit_sec });
    }
    let total = time_limit_sec.ceil() as u64;
    let days = total / 86_400;
    let hours = total % 86_400 / 3_600;
    let minutes = total % 3_600 / 60;
    let seconds = total % 60;
    Ok(format!("{days}-{hours:02}:{minutes:02}:{seconds:02}"))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn test_each_task_runs_its_own_line() {
        let script = render_group_script(&[
            "cd /w/a && env JOB_ID=a /bin/agent run-job".to_string(),
            "cd /w/b && env JOB_ID=b NOTE='x > y' /bin/agent run-job".to_string(),
        ])
        .unwrap();
        assert_eq!(
            script,
            indoc! {r#"
                #!/bin/bash
                if [ "$SLURM_PROCID" = "0" ]; then
                    cd /w/a && env JOB_ID=a /bin/agent run-job
                fi
                if [ "$SLURM_PROCID" = "1" ]; then
                    cd /w/b && env JOB_ID=b NOTE='x > y' /bin/agent run-job
                fi
            "#}
        );
    }

    #[test]
    fn test_time_limit_format() {
        assert_eq!(format_time_limit(59.2).unwrap(), "0-00:01:00");
        assert_eq!(format_time_limit(3_661.0).unwrap(), "0-01:01:01");
        assert_eq!(format_time_limit(90_061.0).unwrap(), "1-01:01:01");
    }

    #[test]
    fn test_non_positive_time_limit_is_rejected() {
        assert!(matches!(
            format_time_limit(0.0),
            Err(ComputeException::InvalidTimeLimit { .. })
        ));
        assert!(format_time_limit(-5.0).is_err());
    }
}
