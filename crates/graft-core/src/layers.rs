use crate::errors::GraphValidationError;
use crate::model::Task;
use std::collections::{HashMap, HashSet, VecDeque};

/// Assigns every task a level and returns the levels in execution order, each sorted by id.
pub fn assign_levels(
    tasks: &mut HashMap<String, Task>,
) -> Result<Vec<Vec<String>>, GraphValidationError> {
    if tasks.is_empty() {
        return Ok(Vec::new());
    }

    let mut in_degree: HashMap<String, usize> = tasks
        .iter()
        .map(|(id, task)| (id.clone(), task.depends_on.len()))
        .collect();

    let mut level: HashMap<String, u32> = tasks.keys().map(|id| (id.clone(), 0)).collect();

    let mut roots: Vec<String> = in_degree
        .iter()
        .filter_map(|(id, degree)| (*degree == 0).then_some(id.clone()))
        .collect();
    roots.sort();

    let mut queue: VecDeque<String> = roots.into();
    let mut visited: HashSet<String> = HashSet::with_capacity(tasks.len());

    while let Some(task_id) = queue.pop_front() {
        visited.insert(task_id.clone());
        let parent_level = *level
            .get(&task_id)
            .ok_or_else(|| GraphValidationError::MissingDependency(task_id.clone()))?;
        let downstream = tasks
            .get(&task_id)
            .map(|t| t.downstream.clone())
            .ok_or_else(|| GraphValidationError::MissingDependency(task_id.clone()))?;

        for child_id in downstream {
            let child_level = level
                .get_mut(&child_id)
                .ok_or_else(|| GraphValidationError::MissingDependency(child_id.clone()))?;
            *child_level = (*child_level).max(parent_level + 1);

            let child_in_degree = in_degree
                .get_mut(&child_id)
                .ok_or_else(|| GraphValidationError::MissingDependency(child_id.clone()))?;
            *child_in_degree -= 1;
            if *child_in_degree == 0 {
                queue.push_back(child_id);
            }
        }
    }

    if visited.len() != tasks.len() {
        return Err(GraphValidationError::CycleDetected(find_cycle_member(
            tasks, &visited,
        )));
    }

    let mut max_level = 0u32;
    for (task_id, task) in tasks.iter_mut() {
        let assigned = *level
            .get(task_id)
            .ok_or_else(|| GraphValidationError::MissingDependency(task_id.clone()))?;
        task.level = assigned;
        max_level = max_level.max(assigned);
    }

    let mut levels: Vec<Vec<String>> = vec![Vec::new(); max_level as usize + 1];
    for task in tasks.values() {
        levels[task.level as usize].push(task.task_id.clone());
    }
    for ids in &mut levels {
        ids.sort();
    }

    Ok(levels)
}

/// Walks dependency edges among the unvisited tasks until one repeats; that task is on a cycle.
fn find_cycle_member(tasks: &HashMap<String, Task>, visited: &HashSet<String>) -> String {
    let mut remaining: Vec<&String> = tasks.keys().filter(|id| !visited.contains(*id)).collect();
    remaining.sort();

    let Some(start) = remaining.first() else {
        return String::new();
    };

    let mut seen = HashSet::new();
    let mut current = (*start).clone();
    // Every unvisited task has at least one unvisited dependency, so the walk cannot dead-end.
    for _ in 0..=tasks.len() {
        if !seen.insert(current.clone()) {
            return current;
        }
        let next = tasks.get(&current).and_then(|task| {
            let mut deps: Vec<&String> = task
                .depends_on
                .iter()
                .filter(|dep| !visited.contains(*dep))
                .collect();
            deps.sort();
            deps.first().map(|dep| (*dep).clone())
        });
        match next {
            Some(next) => current = next,
            None => return current,
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Task;

    fn build_tasks(defs: Vec<(&str, Vec<&str>)>) -> HashMap<String, Task> {
        let mut tasks = HashMap::new();
        for (id, deps) in &defs {
            let task = Task {
                task_id: (*id).to_string(),
                agent: format!("agent_{id}"),
                depends_on: deps.iter().map(|d| (*d).to_string()).collect(),
                ..Task::default()
            };
            tasks.insert((*id).to_string(), task);
        }

        let ids: Vec<String> = tasks.keys().cloned().collect();
        for id in ids {
            let deps = tasks[&id].depends_on.clone();
            for dep in deps {
                tasks
                    .get_mut(&dep)
                    .expect("dependency exists")
                    .downstream
                    .push(id.clone());
            }
        }

        tasks
    }

    #[test]
    fn assigns_levels_for_linear_chain() {
        let mut tasks = build_tasks(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"])]);
        let levels = assign_levels(&mut tasks).expect("assign levels");
        assert_eq!(levels, vec![vec!["a"], vec!["b"], vec!["c"]]);
        assert_eq!(tasks["a"].level, 0);
        assert_eq!(tasks["b"].level, 1);
        assert_eq!(tasks["c"].level, 2);
    }

    #[test]
    fn assigns_levels_for_diamond() {
        let mut tasks = build_tasks(vec![
            ("a", vec![]),
            ("b", vec!["a"]),
            ("c", vec!["a"]),
            ("d", vec!["b", "c"]),
        ]);
        let levels = assign_levels(&mut tasks).expect("assign levels");
        assert_eq!(levels, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn wide_fan_out_shares_one_level_sorted_by_id() {
        let mut tasks = build_tasks(vec![
            ("a", vec![]),
            ("e", vec!["a"]),
            ("c", vec!["a"]),
            ("d", vec!["a"]),
            ("b", vec!["a"]),
        ]);
        let levels = assign_levels(&mut tasks).expect("assign levels");
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[1], vec!["b", "c", "d", "e"]);
    }

    #[test]
    fn max_parent_rule_applies() {
        let mut tasks = build_tasks(vec![
            ("a", vec![]),
            ("b", vec!["a"]),
            ("c", vec!["a"]),
            ("d", vec!["b"]),
            ("e", vec!["c", "d"]),
        ]);
        let levels = assign_levels(&mut tasks).expect("assign levels");
        assert_eq!(levels.len(), 4);
        assert_eq!(tasks["e"].level, 3);
    }

    #[test]
    fn every_task_sits_after_all_dependencies() {
        let mut tasks = build_tasks(vec![
            ("root", vec![]),
            ("x", vec!["root"]),
            ("y", vec!["x", "root"]),
            ("z", vec!["y"]),
            ("w", vec!["root", "z"]),
            ("side", vec![]),
            ("join", vec!["side", "w"]),
        ]);
        let levels = assign_levels(&mut tasks).expect("assign levels");

        let assigned: usize = levels.iter().map(Vec::len).sum();
        assert_eq!(assigned, tasks.len());
        for task in tasks.values() {
            for dep in &task.depends_on {
                assert!(
                    tasks[dep].level < task.level,
                    "{} (level {}) must follow {} (level {})",
                    task.task_id,
                    task.level,
                    dep,
                    tasks[dep].level
                );
            }
        }
    }

    #[test]
    fn cycle_is_rejected_naming_a_member() {
        let mut tasks = build_tasks(vec![
            ("root", vec![]),
            ("a", vec!["c", "root"]),
            ("b", vec!["a"]),
            ("c", vec!["b"]),
            ("tail", vec!["c"]),
        ]);
        let err = assign_levels(&mut tasks).expect_err("cycle should fail");
        match err {
            GraphValidationError::CycleDetected(task_id) => {
                assert!(
                    ["a", "b", "c"].contains(&task_id.as_str()),
                    "{task_id} is not on the cycle"
                );
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let mut tasks = build_tasks(vec![("a", vec!["a"])]);
        let err = assign_levels(&mut tasks).expect_err("self loop should fail");
        assert_eq!(err, GraphValidationError::CycleDetected("a".to_string()));
    }
}
