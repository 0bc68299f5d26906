use rand::{rngs::SmallRng, Rng};

use crate::network::Vec3;

use super::player::PlayerCar;

/// Players close enough to share one spawn budget.
#[derive(Debug, Clone)]
pub struct PlayerCluster {
	pub centroid: Vec3,
	pub players: Vec<PlayerCar>,
	pub remaining_budget: f32,
}

impl PlayerCluster {
	pub fn new(player: PlayerCar, budget: f32) -> Self {
		Self {
			centroid: player.status.position,
			players: vec![player],
			remaining_budget: budget,
		}
	}

	pub fn add(&mut self, player: PlayerCar, additional_budget: f32) {
		self.players.push(player);
		let sum: Vec3 = self.players.iter().map(|p| p.status.position).sum();
		self.centroid = sum / self.players.len() as f32;
		self.remaining_budget += additional_budget;
	}
}

/// Greedy clustering: each player joins the first cluster whose centroid is
/// within `radius`. Every extra member adds `budget * diminishing`.
pub fn build_clusters(players: &[PlayerCar], radius: f32, budget: f32, diminishing: f32) -> Vec<PlayerCluster> {
	let radius_squared = radius * radius;
	let mut clusters: Vec<PlayerCluster> = Vec::new();
	for player in players {
		match clusters
			.iter_mut()
			.find(|c| (player.status.position - c.centroid).norm_squared() < radius_squared)
		{
			Some(cluster) => cluster.add(*player, budget * diminishing),
			None => clusters.push(PlayerCluster::new(*player, budget)),
		}
	}
	clusters
}

/// Index of a cluster drawn with probability proportional to its remaining
/// budget. None once every budget is spent.
pub fn pick_weighted(clusters: &[PlayerCluster], rng: &mut SmallRng) -> Option<usize> {
	let total: f32 = clusters.iter().map(|c| c.remaining_budget).sum();
	if total <= 0.0 {
		return None;
	}
	let pick = rng.gen::<f32>() * total;
	let mut cumulative = 0.0;
	for (i, cluster) in clusters.iter().enumerate() {
		cumulative += cluster.remaining_budget;
		if cluster.remaining_budget > 0.0 && pick <= cumulative {
			return Some(i);
		}
	}
	clusters.iter().rposition(|c| c.remaining_budget > 0.0)
}
