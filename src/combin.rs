use crate::config::Config;
use crate::types::{Job, Parameter};

/// Expands the config's argument template into all jobs.
pub fn combine_jobs(config: &Config) -> Vec<Job> {
    combine(&config.command, &config.arguments, &config.parameters)
}

/// Number of jobs the parameters expand to, or `None` when it does not fit
/// in a `u32`. No parameters still make one job.
pub fn job_count(parameters: &[Parameter]) -> Option<u32> {
    parameters.iter().try_fold(1u32, |total, p| {
        total.checked_mul(u32::try_from(p.values.len()).ok()?)
    })
}

/// Cartesian product of the parameter values, one job per combination.
///
/// The last parameter varies fastest. Job indices are assigned in the order
/// combinations are produced, so the same inputs always yield the same
/// index for the same command line.
///
/// Parameters are expected to have passed config validation. A parameter
/// without values, or more than `u32::MAX` combinations, yields no jobs.
pub fn combine(command: &str, arguments: &[String], parameters: &[Parameter]) -> Vec<Job> {
    let total = match job_count(parameters) {
        None | Some(0) => return Vec::new(),
        Some(total) => total,
    };
    if parameters.is_empty() {
        return vec![Job::new(0, command, arguments.to_vec())];
    }

    let mut jobs = Vec::with_capacity(total.min(PREALLOCATED_JOBS) as usize);
    let mut digits = vec![0usize; parameters.len()];
    let mut index = 0u32;

    loop {
        let args = arguments
            .iter()
            .map(|arg| substitute(arg, parameters, &digits))
            .collect();
        jobs.push(Job::new(index, command, args));

        // Odometer step: bump the rightmost digit that still has room and
        // reset everything to its right.
        let mut pos = parameters.len();
        loop {
            if pos == 0 {
                return jobs;
            }
            pos -= 1;
            if digits[pos] + 1 < parameters[pos].values.len() {
                digits[pos] += 1;
                break;
            }
            digits[pos] = 0;
        }
        // At most `total` combinations exist and `total <= u32::MAX`.
        index += 1;
    }
}

const PREALLOCATED_JOBS: u32 = 1 << 16;

/// Replaces every `%name%` in `arg` with the currently selected value.
///
/// Single pass: a substituted value is never scanned again, and `%...%`
/// sequences that name no parameter are copied through untouched.
fn substitute(arg: &str, parameters: &[Parameter], digits: &[usize]) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;

    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        let replacement = after.find('%').and_then(|end| {
            let name = &after[..end];
            parameters
                .iter()
                .position(|p| p.name == name)
                .map(|i| (&parameters[i].values[digits[i]], end))
        });

        match replacement {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('%');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn param(name: &str, values: &[&str]) -> Parameter {
        Parameter::new(name, values.iter().map(|v| v.to_string()).collect())
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn job(index: u32, command: &str, arguments: &[&str]) -> Job {
        Job::new(index, command, args(arguments))
    }

    #[test]
    fn no_parameters_yields_single_job() {
        let jobs = combine("hello", &args(&["world", "%a%"]), &[]);
        assert_eq!(jobs, vec![job(0, "hello", &["world", "%a%"])]);
    }

    #[test]
    fn two_parameters_last_varies_fastest() {
        let jobs = combine(
            "hello",
            &args(&["world", "%a%", "%b%"]),
            &[param("a", &["1", "2"]), param("b", &["x", "y"])],
        );
        assert_eq!(
            jobs,
            vec![
                job(0, "hello", &["world", "1", "x"]),
                job(1, "hello", &["world", "1", "y"]),
                job(2, "hello", &["world", "2", "x"]),
                job(3, "hello", &["world", "2", "y"]),
            ]
        );
    }

    #[test]
    fn placeholders_out_of_declaration_order() {
        let jobs = combine(
            "hello",
            &args(&["%c%", "world", "%a%", "%b%"]),
            &[
                param("a", &["1", "2"]),
                param("b", &["1"]),
                param("c", &["x", "y", "z"]),
            ],
        );
        assert_eq!(
            jobs,
            vec![
                job(0, "hello", &["x", "world", "1", "1"]),
                job(1, "hello", &["y", "world", "1", "1"]),
                job(2, "hello", &["z", "world", "1", "1"]),
                job(3, "hello", &["x", "world", "2", "1"]),
                job(4, "hello", &["y", "world", "2", "1"]),
                job(5, "hello", &["z", "world", "2", "1"]),
            ]
        );
    }

    #[test]
    fn several_placeholders_in_one_argument() {
        let jobs = combine(
            "run",
            &args(&["--size=%w%x%h%", "plain"]),
            &[param("w", &["640"]), param("h", &["480", "720"])],
        );
        assert_eq!(
            jobs,
            vec![
                job(0, "run", &["--size=640x480", "plain"]),
                job(1, "run", &["--size=640x720", "plain"]),
            ]
        );
    }

    #[test]
    fn same_placeholder_twice() {
        let jobs = combine("echo", &args(&["%n%-%n%"]), &[param("n", &["7"])]);
        assert_eq!(jobs, vec![job(0, "echo", &["7-7"])]);
    }

    #[test]
    fn unknown_placeholders_pass_through() {
        let jobs = combine(
            "echo",
            &args(&["100%", "%unknown%", "%%", "50%%n%"]),
            &[param("n", &["5"])],
        );
        assert_eq!(jobs, vec![job(0, "echo", &["100%", "%unknown%", "%%", "50%5"])]);
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let jobs = combine(
            "echo",
            &args(&["%a%%b%"]),
            &[param("a", &["%b%"]), param("b", &["B"])],
        );
        assert_eq!(jobs, vec![job(0, "echo", &["%b%B"])]);
    }

    #[test]
    fn unreferenced_parameter_still_multiplies_jobs() {
        let jobs = combine("true", &[], &[param("rep", &["1", "2", "3"])]);
        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|j| j.arguments.is_empty()));
    }

    #[test]
    fn job_count_is_product_with_dense_unique_indices() {
        let params = vec![
            param("a", &["1", "2", "3"]),
            param("b", &["x"]),
            param("c", &["p", "q"]),
            param("d", &["u", "v", "w", "z"]),
        ];
        let jobs = combine("cmd", &args(&["%a%", "%b%", "%c%", "%d%"]), &params);
        assert_eq!(jobs.len(), 3 * 2 * 4);

        let indices: Vec<u32> = jobs.iter().map(|j| j.index).collect();
        assert_eq!(indices, (0..24).collect::<Vec<u32>>());

        let distinct: HashSet<&Vec<String>> = jobs.iter().map(|j| &j.arguments).collect();
        assert_eq!(distinct.len(), 24);
    }

    #[test]
    fn job_count_of_parameters() {
        assert_eq!(job_count(&[]), Some(1));
        assert_eq!(job_count(&[param("a", &["1", "2"]), param("b", &["x", "y", "z"])]), Some(6));
        assert_eq!(job_count(&[param("a", &["1"]), param("b", &[])]), Some(0));
    }

    #[test]
    fn job_count_overflow_detected() {
        let values: Vec<String> = (0..10).map(|v| v.to_string()).collect();
        let params: Vec<Parameter> = (0..20)
            .map(|i| Parameter::new(format!("p{}", i), values.clone()))
            .collect();
        assert_eq!(job_count(&params), None);
        assert!(combine("x", &[], &params).is_empty());
    }

    #[test]
    fn empty_value_list_yields_no_jobs() {
        assert!(combine("x", &args(&["%a%"]), &[param("a", &[])]).is_empty());
    }

    #[test]
    fn deterministic_across_invocations() {
        let params = vec![param("a", &["1", "2"]), param("b", &["x", "y", "z"])];
        let template = args(&["-a", "%a%", "-b", "%b%"]);
        assert_eq!(
            combine("cmd", &template, &params),
            combine("cmd", &template, &params)
        );
    }

    #[test]
    fn combine_jobs_uses_config_fields() {
        let cfg = Config::from_json_str(
            r#"{ "command": "sleep", "arguments": ["%time%"], "timeout": 10,
                 "parameters": { "time": ["1", "2", "3"] } }"#,
        )
        .unwrap();
        assert_eq!(
            combine_jobs(&cfg),
            vec![
                job(0, "sleep", &["1"]),
                job(1, "sleep", &["2"]),
                job(2, "sleep", &["3"]),
            ]
        );
    }
}
