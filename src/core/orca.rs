//! ORCA (Optimal Reciprocal Collision Avoidance) velocity planner
//!
//! Half-plane construction against agent neighbors and segment obstacles,
//! then 2D linear programming with a 3D distance-relaxation fallback. The
//! structure follows the public RVO2 algorithm's
//! `ComputeNewVelocity`/`LinearProgram1/2/3` call sites.

use glam::Vec2;

pub const RVO_EPSILON: f32 = 1e-5;

/// A single ORCA half-plane constraint: feasible velocities satisfy
/// `det(direction, point - v) <= 0`.
#[derive(Debug, Clone, Copy)]
pub struct Line {
    pub point: Vec2,
    pub direction: Vec2,
}

fn det(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

/// One neighboring agent as seen by the solver.
#[derive(Debug, Clone, Copy)]
pub struct AgentNeighbor {
    pub position: Vec2,
    pub velocity: Vec2,
    pub radius: f32,
}

/// One neighboring obstacle segment `point -> next_point`, with endpoint
/// convexity and outward unit directions
#[derive(Debug, Clone, Copy)]
pub struct ObstacleSegment {
    pub point: Vec2,
    pub next_point: Vec2,
    pub direction: Vec2,
    pub is_convex: bool,
    pub next_is_convex: bool,
    /// Direction of the segment immediately preceding this one, used for
    /// "foreign leg" detection at the left vertex.
    pub prev_direction: Vec2,
    /// Direction of the segment immediately following the next vertex, used
    /// for "foreign leg" detection at the right vertex.
    pub next_next_direction: Vec2,
}

pub struct AgentState {
    pub position: Vec2,
    pub radius: f32,
    pub velocity: Vec2,
    pub max_speed: f32,
    pub time_horizon_agent: f32,
    pub time_horizon_obstacle: f32,
}

/// Appends ORCA lines for every obstacle segment neighbor Returns the number of obstacle lines appended
/// so the caller can tell `LinearProgram3` which lines are hard constraints.
pub fn compute_obstacle_lines(agent: &AgentState, obstacles: &[ObstacleSegment], lines: &mut Vec<Line>) -> usize {
    let inv_time_horizon_obst = 1.0 / agent.time_horizon_obstacle;
    let start_len = lines.len();

    for obstacle in obstacles {
        let relative_position1 = obstacle.point - agent.position;
        let relative_position2 = obstacle.next_point - agent.position;

        let already_covered = lines[..lines.len()].iter().any(|line| {
            det(inv_time_horizon_obst * relative_position1 - line.point, line.direction) - inv_time_horizon_obst * agent.radius
                >= -RVO_EPSILON
                && det(inv_time_horizon_obst * relative_position2 - line.point, line.direction) - inv_time_horizon_obst * agent.radius
                    >= -RVO_EPSILON
        });
        if already_covered {
            continue;
        }

        let dist_sq1 = relative_position1.length_squared();
        let dist_sq2 = relative_position2.length_squared();
        let radius_sq = agent.radius * agent.radius;

        let obstacle_vector = obstacle.next_point - obstacle.point;
        let s = (-relative_position1).dot(obstacle_vector) / obstacle_vector.length_squared().max(f32::EPSILON);
        let dist_sq_line = (-relative_position1 - obstacle_vector * s).length_squared();

        if s < 0.0 && dist_sq1 <= radius_sq {
            if obstacle.is_convex {
                lines.push(Line { point: Vec2::ZERO, direction: Vec2::new(-relative_position1.y, relative_position1.x).normalize_or_zero() });
            }
            continue;
        } else if s > 1.0 && dist_sq2 <= radius_sq {
            if obstacle.next_is_convex && det(relative_position2, obstacle.direction) >= 0.0 {
                lines.push(Line { point: Vec2::ZERO, direction: Vec2::new(-relative_position2.y, relative_position2.x).normalize_or_zero() });
            }
            continue;
        } else if (0.0..1.0).contains(&s) && dist_sq_line <= radius_sq {
            lines.push(Line { point: Vec2::ZERO, direction: -obstacle.direction });
            continue;
        }

        // No collision: compute leg directions.
        let (left_leg, right_leg, mut is_left_foreign, mut is_right_foreign, left_convex_for_foreign, right_convex_for_foreign);
        if s < 0.0 && dist_sq_line <= radius_sq {
            if !obstacle.is_convex {
                continue;
            }
            let leg1 = (dist_sq1 - radius_sq).max(0.0).sqrt();
            left_leg = Vec2::new(
                relative_position1.x * leg1 - relative_position1.y * agent.radius,
                relative_position1.x * agent.radius + relative_position1.y * leg1,
            ) / dist_sq1.max(f32::EPSILON);
            right_leg = Vec2::new(
                relative_position1.x * leg1 + relative_position1.y * agent.radius,
                -relative_position1.x * agent.radius + relative_position1.y * leg1,
            ) / dist_sq1.max(f32::EPSILON);
            is_left_foreign = false;
            is_right_foreign = false;
            left_convex_for_foreign = obstacle.is_convex;
            right_convex_for_foreign = obstacle.is_convex;
        } else if s > 1.0 && dist_sq_line <= radius_sq {
            if !obstacle.next_is_convex {
                continue;
            }
            let leg2 = (dist_sq2 - radius_sq).max(0.0).sqrt();
            left_leg = Vec2::new(
                relative_position2.x * leg2 - relative_position2.y * agent.radius,
                relative_position2.x * agent.radius + relative_position2.y * leg2,
            ) / dist_sq2.max(f32::EPSILON);
            right_leg = Vec2::new(
                relative_position2.x * leg2 + relative_position2.y * agent.radius,
                -relative_position2.x * agent.radius + relative_position2.y * leg2,
            ) / dist_sq2.max(f32::EPSILON);
            is_left_foreign = false;
            is_right_foreign = false;
            left_convex_for_foreign = obstacle.next_is_convex;
            right_convex_for_foreign = obstacle.next_is_convex;
        } else {
            let left_leg_raw = if obstacle.is_convex {
                let leg1 = (dist_sq1 - radius_sq).max(0.0).sqrt();
                Vec2::new(
                    relative_position1.x * leg1 - relative_position1.y * agent.radius,
                    relative_position1.x * agent.radius + relative_position1.y * leg1,
                ) / dist_sq1.max(f32::EPSILON)
            } else {
                -obstacle.prev_direction
            };
            let right_leg_raw = if obstacle.next_is_convex {
                let leg2 = (dist_sq2 - radius_sq).max(0.0).sqrt();
                Vec2::new(
                    relative_position2.x * leg2 + relative_position2.y * agent.radius,
                    -relative_position2.x * agent.radius + relative_position2.y * leg2,
                ) / dist_sq2.max(f32::EPSILON)
            } else {
                obstacle.direction
            };
            left_leg = left_leg_raw;
            right_leg = right_leg_raw;
            is_left_foreign = false;
            is_right_foreign = false;
            left_convex_for_foreign = obstacle.is_convex;
            right_convex_for_foreign = obstacle.next_is_convex;
        }

        let mut left_leg_dir = left_leg;
        let mut right_leg_dir = right_leg;
        if left_convex_for_foreign && det(left_leg_dir, -obstacle.prev_direction) >= 0.0 {
            left_leg_dir = -obstacle.prev_direction;
            is_left_foreign = true;
        }
        if right_convex_for_foreign && det(right_leg_dir, obstacle.next_next_direction) <= 0.0 {
            right_leg_dir = obstacle.next_next_direction;
            is_right_foreign = true;
        }

        let left_cutoff = inv_time_horizon_obst * relative_position1;
        let right_cutoff = inv_time_horizon_obst * relative_position2;
        let cutoff_vector = right_cutoff - left_cutoff;

        let same_point = (obstacle.point - obstacle.next_point).length_squared() < f32::EPSILON;
        let t = if same_point { 0.5 } else { (agent.velocity - left_cutoff).dot(cutoff_vector) / cutoff_vector.length_squared().max(f32::EPSILON) };
        let t_left = (agent.velocity - left_cutoff).dot(left_leg_dir);
        let t_right = (agent.velocity - right_cutoff).dot(right_leg_dir);

        if (t < 0.0 && t_left < 0.0) || (same_point && t_left < 0.0 && t_right < 0.0) {
            let unit_w = (agent.velocity - left_cutoff).normalize_or_zero();
            lines.push(Line {
                direction: Vec2::new(unit_w.y, -unit_w.x),
                point: left_cutoff + agent.radius * inv_time_horizon_obst * unit_w,
            });
            continue;
        } else if t > 1.0 && t_right < 0.0 {
            let unit_w = (agent.velocity - right_cutoff).normalize_or_zero();
            lines.push(Line {
                direction: Vec2::new(unit_w.y, -unit_w.x),
                point: right_cutoff + agent.radius * inv_time_horizon_obst * unit_w,
            });
            continue;
        }

        let dist_sq_cutoff = if !(0.0..=1.0).contains(&t) || same_point {
            f32::INFINITY
        } else {
            (agent.velocity - (left_cutoff + t * cutoff_vector)).length_squared()
        };
        let dist_sq_left = if t_left < 0.0 { f32::INFINITY } else { (agent.velocity - (left_cutoff + t_left * left_leg_dir)).length_squared() };
        let dist_sq_right = if t_right < 0.0 { f32::INFINITY } else { (agent.velocity - (right_cutoff + t_right * right_leg_dir)).length_squared() };

        if dist_sq_cutoff <= dist_sq_left && dist_sq_cutoff <= dist_sq_right {
            let direction = -obstacle.direction;
            lines.push(Line { direction, point: left_cutoff + agent.radius * inv_time_horizon_obst * Vec2::new(-direction.y, direction.x) });
        } else if dist_sq_left <= dist_sq_right {
            if is_left_foreign {
                continue;
            }
            lines.push(Line { direction: left_leg_dir, point: left_cutoff + agent.radius * inv_time_horizon_obst * Vec2::new(-left_leg_dir.y, left_leg_dir.x) });
        } else {
            if is_right_foreign {
                continue;
            }
            let direction = -right_leg_dir;
            lines.push(Line { direction, point: right_cutoff + agent.radius * inv_time_horizon_obst * Vec2::new(-direction.y, direction.x) });
        }
    }
    lines.len() - start_len
}

/// Appends one ORCA line per agent neighbor
pub fn compute_agent_lines(agent: &AgentState, neighbors: &[AgentNeighbor], time_step: f32, lines: &mut Vec<Line>) {
    let inv_time_horizon = 1.0 / agent.time_horizon_agent;
    for other in neighbors {
        let relative_position = other.position - agent.position;
        let relative_velocity = agent.velocity - other.velocity;
        let dist_sq = relative_position.length_squared();
        let combined_radius = agent.radius + other.radius;
        let combined_radius_sq = combined_radius * combined_radius;

        let (direction, u);
        if dist_sq > combined_radius_sq {
            let w = relative_velocity - inv_time_horizon * relative_position;
            let w_length_sq = w.length_squared();
            let dot_product1 = w.dot(relative_position);
            if dot_product1 < 0.0 && dot_product1 * dot_product1 > combined_radius_sq * w_length_sq {
                let w_length = w_length_sq.sqrt();
                let unit_w = w / w_length;
                direction = Vec2::new(unit_w.y, -unit_w.x);
                u = (combined_radius * inv_time_horizon - w_length) * unit_w;
            } else {
                let leg = (dist_sq - combined_radius_sq).max(0.0).sqrt();
                let dir = if det(relative_position, w) > 0.0 {
                    Vec2::new(
                        relative_position.x * leg - relative_position.y * combined_radius,
                        relative_position.x * combined_radius + relative_position.y * leg,
                    ) / dist_sq
                } else {
                    -Vec2::new(
                        relative_position.x * leg + relative_position.y * combined_radius,
                        -relative_position.x * combined_radius + relative_position.y * leg,
                    ) / dist_sq
                };
                direction = dir;
                let dot_product2 = relative_velocity.dot(direction);
                u = dot_product2 * direction - relative_velocity;
            }
        } else {
            let inv_time_step = 1.0 / time_step.max(f32::EPSILON);
            let w = relative_velocity - inv_time_step * relative_position;
            let w_length = w.length().max(f32::EPSILON);
            let unit_w = w / w_length;
            direction = Vec2::new(unit_w.y, -unit_w.x);
            u = (combined_radius * inv_time_step - w_length) * unit_w;
        }

        lines.push(Line { point: agent.velocity + 0.5 * u, direction });
    }
}

/// Solves the 1D sub-problem for a single line against all earlier lines
/// and the disk of the given radius.
fn linear_program1(lines: &[Line], line_no: usize, radius: f32, opt_velocity: Vec2, direction_opt: bool) -> Option<Vec2> {
    let dot_product = lines[line_no].point.dot(lines[line_no].direction);
    let discriminant = dot_product * dot_product + radius * radius - lines[line_no].point.length_squared();
    if discriminant < 0.0 {
        return None;
    }
    let sqrt_discriminant = discriminant.sqrt();
    let mut t_left = -dot_product - sqrt_discriminant;
    let mut t_right = -dot_product + sqrt_discriminant;

    for i in 0..line_no {
        let denominator = det(lines[line_no].direction, lines[i].direction);
        let numerator = det(lines[i].direction, lines[line_no].point - lines[i].point);
        if denominator.abs() <= RVO_EPSILON {
            if numerator < 0.0 {
                return None;
            }
            continue;
        }
        let t = numerator / denominator;
        if denominator >= 0.0 {
            t_right = t_right.min(t);
        } else {
            t_left = t_left.max(t);
        }
        if t_left > t_right {
            return None;
        }
    }

    let t = if direction_opt {
        if opt_velocity.dot(lines[line_no].direction) > 0.0 { t_right } else { t_left }
    } else {
        lines[line_no].direction.dot(opt_velocity - lines[line_no].point).clamp(t_left, t_right)
    };
    Some(lines[line_no].point + t * lines[line_no].direction)
}

/// Sequentially intersects each line's half-plane with the disk of radius
/// `max_speed`. Returns `(velocity, failIndex)`; `failIndex == lines.len()`
/// means fully feasible
pub fn linear_program2(lines: &[Line], max_speed: f32, opt_velocity: Vec2, direction_opt: bool) -> (Vec2, usize) {
    let mut result = if direction_opt {
        opt_velocity * max_speed
    } else if opt_velocity.length_squared() > max_speed * max_speed {
        opt_velocity.normalize_or_zero() * max_speed
    } else {
        opt_velocity
    };

    for i in 0..lines.len() {
        if det(lines[i].direction, lines[i].point - result) > 0.0 {
            let temp_result = result;
            match linear_program1(lines, i, max_speed, opt_velocity, direction_opt) {
                Some(v) => result = v,
                None => return (temp_result, i),
            }
        }
    }
    (result, lines.len())
}

/// 3D relaxation fallback: obstacle lines are hard, agent lines
/// can be relaxed, minimizing the maximum violation distance.
pub fn linear_program3(lines: &[Line], num_obstacle_lines: usize, begin_line: usize, max_speed: f32, result: Vec2) -> Vec2 {
    let mut distance = 0.0f32;
    let mut result = result;

    for i in begin_line..lines.len() {
        if det(lines[i].direction, lines[i].point - result) > distance {
            let mut proj_lines: Vec<Line> = lines[..num_obstacle_lines].to_vec();
            for j in num_obstacle_lines..i {
                let determinant = det(lines[i].direction, lines[j].direction);
                let point = if determinant.abs() <= RVO_EPSILON {
                    if lines[i].direction.dot(lines[j].direction) > 0.0 {
                        continue;
                    }
                    0.5 * (lines[i].point + lines[j].point)
                } else {
                    lines[i].point + (det(lines[j].direction, lines[i].point - lines[j].point) / determinant) * lines[i].direction
                };
                let direction = (lines[j].direction - lines[i].direction).normalize_or_zero();
                proj_lines.push(Line { point, direction });
            }

            let temp_result = result;
            let perp = Vec2::new(-lines[i].direction.y, lines[i].direction.x);
            let (new_result, fail) = linear_program2(&proj_lines, max_speed, perp, true);
            if fail < proj_lines.len() {
                // Should be infeasible only due to numerical error; keep prior result.
                result = temp_result;
            } else {
                result = new_result;
            }
            distance = det(lines[i].direction, lines[i].point - result);
        }
    }
    result
}

/// Runs the full two-stage solve (LP2, then LP3 on infeasibility) against a
/// single neighbor set. Obstacle lines must be pushed before agent lines
/// into `lines`, and `num_obstacle_lines` must count them
pub fn compute_new_velocity(lines: &[Line], num_obstacle_lines: usize, max_speed: f32, preferred_velocity: Vec2) -> Vec2 {
    let (velocity, fail_index) = linear_program2(lines, max_speed, preferred_velocity, false);
    if fail_index < lines.len() {
        linear_program3(lines, num_obstacle_lines, fail_index, max_speed, velocity)
    } else {
        velocity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(position: Vec2, velocity: Vec2) -> AgentState {
        AgentState {
            position,
            radius: 20.0,
            velocity,
            max_speed: 100.0,
            time_horizon_agent: 2.0,
            time_horizon_obstacle: 2.0,
        }
    }

    #[test]
    fn lone_agent_keeps_preferred_velocity() {
        let a = agent(Vec2::ZERO, Vec2::new(100.0, 0.0));
        let mut lines = Vec::new();
        compute_agent_lines(&a, &[], 1.0 / 30.0, &mut lines);
        let v = compute_new_velocity(&lines, 0, a.max_speed, Vec2::new(100.0, 0.0));
        assert!((v - Vec2::new(100.0, 0.0)).length() < 1e-3);
    }

    #[test]
    fn head_on_pair_deflects_perpendicular() {
        let a = agent(Vec2::new(-100.0, 0.0), Vec2::new(100.0, 0.0));
        let other = AgentNeighbor { position: Vec2::new(100.0, 0.0), velocity: Vec2::new(-100.0, 0.0), radius: 20.0 };
        let mut lines = Vec::new();
        compute_agent_lines(&a, &[other], 1.0 / 30.0, &mut lines);
        let v = compute_new_velocity(&lines, 0, a.max_speed, Vec2::new(100.0, 0.0));
        assert!(v.length() <= a.max_speed + RVO_EPSILON);
        assert!(v.y.abs() > 1e-3, "expected lateral deflection, got {v:?}");
    }

    #[test]
    fn speed_bound_holds_under_lp3_fallback() {
        // Three tightly packed neighbors force an overconstrained system.
        let a = agent(Vec2::ZERO, Vec2::new(50.0, 0.0));
        let neighbors = [
            AgentNeighbor { position: Vec2::new(10.0, 0.0), velocity: Vec2::new(-50.0, 0.0), radius: 20.0 },
            AgentNeighbor { position: Vec2::new(-5.0, 15.0), velocity: Vec2::new(20.0, -50.0), radius: 20.0 },
            AgentNeighbor { position: Vec2::new(-5.0, -15.0), velocity: Vec2::new(20.0, 50.0), radius: 20.0 },
        ];
        let mut lines = Vec::new();
        compute_agent_lines(&a, &neighbors, 1.0 / 30.0, &mut lines);
        let v = compute_new_velocity(&lines, 0, a.max_speed, Vec2::new(50.0, 0.0));
        assert!(v.length() <= a.max_speed + 1e-2, "speed bound violated: {v:?}");
    }

    #[test]
    fn half_plane_property_holds_for_feasible_solution() {
        let a = agent(Vec2::new(-100.0, 0.0), Vec2::new(100.0, 0.0));
        let other = AgentNeighbor { position: Vec2::new(100.0, 0.0), velocity: Vec2::new(-100.0, 0.0), radius: 20.0 };
        let mut lines = Vec::new();
        compute_agent_lines(&a, &[other], 1.0 / 30.0, &mut lines);
        let (v, fail) = linear_program2(&lines, a.max_speed, Vec2::new(100.0, 0.0), false);
        if fail == lines.len() {
            for line in &lines {
                let perp = Vec2::new(-line.direction.y, line.direction.x);
                assert!((v - line.point).dot(perp) >= -RVO_EPSILON);
            }
        }
    }
}
