use std::{
	any::Any,
	panic::{catch_unwind, AssertUnwindSafe},
	sync::{
		atomic::{AtomicI64, AtomicU32, Ordering},
		Arc,
	},
	time::{Duration, Instant},
};

use parking_lot::{Mutex, RwLock};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use tokio::{
	sync::watch,
	task::JoinHandle,
	time::{interval, sleep, MissedTickBehavior},
};
use tracing::{debug, error, info, trace};

use crate::{
	clock::Clock,
	config::{AiMode, TrafficConfig},
	network::{link, navigation::JunctionEvaluator, Network, Vec3},
	vehicle::{shared::AiRef, status::CarStatus},
};

use self::{
	cluster::{build_clusters, pick_weighted},
	debug::{batch, AiDebugEntry, AiDebugPacket, TrafficSink},
	metrics::{MetricsSnapshot, TrafficMetrics},
	player::{PlayerCar, PlayerRegistry},
	slot::{AiHandle, AiSlot},
};

pub mod cluster;
pub mod debug;
pub mod metrics;
pub mod player;
pub mod slot;

/// Collisions further than this from the reporting player are not matched to
/// an AI instance.
const COLLISION_MATCH_DISTANCE: f32 = 25.0;
const COLLISION_DELAY_MS: (u64, u64) = (100, 500);
const NEIGHBOUR_SEARCH_METERS: f32 = 50.0;
const UNSAFE_SPAWN_STEP_POINTS: u32 = 5;

/// Weather and time of day as far as AI lights, wipers and density care.
#[derive(Debug, Clone, Copy, Default)]
pub struct Environment {
	/// 0..=1
	pub rain_intensity: f32,
	/// Sun altitude in radians, None when unknown.
	pub sun_altitude: Option<f64>,
	pub hour: Option<u32>,
}

/// What an AI may look at while scanning for obstacles.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
	pub now: i64,
	pub players: &'a [PlayerCar],
	pub ai: &'a [AiRef],
	pub environment: Environment,
}

/// A player's car hit something. `target` is the other car's session id when
/// it was a car.
#[derive(Debug, Clone, Copy)]
pub struct CollisionEvent {
	pub sender: u8,
	pub target: Option<u8>,
	pub speed: f32,
}

/// Keeps the AI population balanced around the players and drives both
/// periodic loops.
#[derive(Debug)]
pub struct TrafficCoordinator {
	network: Arc<Network>,
	config: Arc<TrafficConfig>,
	clock: Arc<dyn Clock>,
	slots: Vec<Arc<AiSlot>>,
	players: PlayerRegistry,
	environment: RwLock<Environment>,
	navigation: Mutex<JunctionEvaluator>,
	rng: Mutex<SmallRng>,
	session_start: AtomicI64,
	metrics: TrafficMetrics,
	sink: Option<Arc<dyn TrafficSink>>,
}

impl TrafficCoordinator {
	pub fn new(
		network: Arc<Network>,
		mut config: TrafficConfig,
		clock: Arc<dyn Clock>,
		sink: Option<Arc<dyn TrafficSink>>
	) -> Self {
		config.apply_fixes();
		let config = Arc::new(config);
		let mut rng = SmallRng::seed_from_u64(config.seed.unwrap_or_else(rand::random));
		let ids = Arc::new(AtomicU32::new(0));
		let slots = config.slots
			.iter()
			.filter(|slot| slot.ai_mode != AiMode::None)
			.map(|slot| Arc::new(AiSlot::new(slot, network.clone(), config.clone(), ids.clone(), rng.gen())))
			.collect();
		let navigation = JunctionEvaluator::non_caching(network.clone(), rng.gen());

		Self {
			network,
			config,
			clock,
			slots,
			players: PlayerRegistry::default(),
			environment: RwLock::new(Environment::default()),
			navigation: Mutex::new(navigation),
			rng: Mutex::new(rng),
			session_start: AtomicI64::new(0),
			metrics: TrafficMetrics::default(),
			sink,
		}
	}

	pub fn network(&self) -> &Arc<Network> {
		&self.network
	}

	pub fn config(&self) -> &TrafficConfig {
		&self.config
	}

	pub fn players(&self) -> &PlayerRegistry {
		&self.players
	}

	pub fn slots(&self) -> &[Arc<AiSlot>] {
		&self.slots
	}

	pub fn slot(&self, session_id: u8) -> Option<&Arc<AiSlot>> {
		self.slots.iter().find(|slot| slot.session_id == session_id)
	}

	pub fn metrics(&self) -> MetricsSnapshot {
		self.metrics.snapshot()
	}

	pub fn environment(&self) -> Environment {
		*self.environment.read()
	}

	pub fn set_environment(&self, environment: Environment) {
		*self.environment.write() = environment;
	}

	fn ai_slots(&self) -> impl Iterator<Item = &Arc<AiSlot>> {
		self.slots.iter().filter(|slot| slot.is_ai_controlled())
	}

	// SESSION EVENTS

	/// A player passed the checksum on `session_id`; AI gives the car up.
	pub fn player_connected(&self, session_id: u8) {
		self.players.connect(session_id, self.clock.now_ms());
		if let Some(slot) = self.slot(session_id) {
			slot.set_ai_control(false);
		}
		self.adjust_overbooking();
	}

	pub fn player_disconnected(&self, session_id: u8) {
		self.players.disconnect(session_id);
		if let Some(slot) = self.slot(session_id) {
			slot.set_ai_control(true);
		}
		self.adjust_overbooking();
	}

	pub fn update_player(&self, session_id: u8, status: CarStatus) {
		self.players.update_status(session_id, status, self.clock.now_ms());
	}

	/// A new session starts at `start_ms`: all AI goes away and spawning waits
	/// for the start.
	pub fn session_changed(&self, start_ms: i64) {
		self.session_start.store(start_ms, Ordering::SeqCst);
		for slot in &self.slots {
			slot.despawn_all();
		}
		debug!(start_ms, "session changed, despawned all AI");
	}

	/// Spreads the target AI count over the AI-controlled slots, the first
	/// `target % slots` of them taking one extra.
	pub fn adjust_overbooking(&self) {
		let player_count = self.players.connected_count();
		let slots: Vec<&Arc<AiSlot>> = self.ai_slots().collect();
		if slots.is_empty() {
			debug!("AI slot overbooking update - no AI slots available");
			return;
		}

		let density = self.config.density_at(self.environment().hour);
		let per_player = ((self.config.ai_per_player_target_count as f32 * density).round() as usize).min(slots.len());
		let target = (player_count * per_player).min(self.config.max_ai_target_count);
		let overbooking = target / slots.len();
		let rest = target % slots.len();
		debug!(
			players = player_count,
			slots = slots.len(),
			target, overbooking, rest,
			"AI slot overbooking update"
		);

		let now = self.clock.now_ms();
		for (i, slot) in slots.iter().enumerate() {
			slot.set_overbooking(if i < rest { overbooking + 1 } else { overbooking }, now);
		}
	}

	/// Matches a collision to the nearest AI instance of the hit slot and stops
	/// it after a short reaction delay. The instance is re-validated by its
	/// spawn counter when the delay expires. Needs a tokio runtime.
	pub fn on_collision(&self, event: CollisionEvent) -> Option<JoinHandle<bool>> {
		let slot = self.slot(event.target?)?;
		if !slot.is_ai_controlled() {
			return None;
		}
		let sender = self.players.get(event.sender)?;
		let (handle, distance_squared) = slot.closest_state(&sender.status.position)?;
		if distance_squared >= COLLISION_MATCH_DISTANCE * COLLISION_MATCH_DISTANCE {
			return None;
		}

		let spawn_counter = handle.shared.snapshot().spawn_counter;
		let delay = self.rng.lock().gen_range(COLLISION_DELAY_MS.0..COLLISION_DELAY_MS.1);
		let clock = self.clock.clone();
		trace!(sender = event.sender, ai = handle.shared.id, speed = event.speed, delay, "collision with AI");
		Some(tokio::spawn(async move {
			sleep(Duration::from_millis(delay)).await;
			let stopped = handle.state.lock().stop_for_collision_if_current(spawn_counter, clock.now_ms());
			stopped
		}))
	}

	// UPDATE

	/// Players that count for spawning: sent a position, not AFK, and driving
	/// a direction traffic is allowed to follow.
	fn active_players(&self, now: i64) -> Vec<PlayerCar> {
		let afk_timeout = self.config.player_afk_timeout_ms();
		let any_direction = self.config.two_way_traffic || self.config.wrong_way_traffic;
		self.players
			.all()
			.into_iter()
			.filter(|player| player.has_sent_first_update && !player.is_afk(now, afk_timeout))
			.filter(|player| {
				any_direction || self.network
					.world_to_spline(&player.status.position)
					.is_some_and(|(point, _)| self.network.forward(point).dot(&player.status.velocity) > 0.0)
			})
			.collect()
	}

	/// Initialized instances far enough from every player, out of spawn
	/// protection, farthest first.
	pub fn respawn_candidates(&self, now: i64, players: &[PlayerCar]) -> Vec<(Arc<AiSlot>, AiHandle)> {
		let offsets: Vec<Vec3> = players
			.iter()
			.map(|player| {
				let direction = player.status.velocity.try_normalize(1.0e-6).unwrap_or_else(Vec3::zeros);
				player.status.position + direction * self.config.player_position_offset_meters
			})
			.collect();

		let mut distances: Vec<(Arc<AiSlot>, AiHandle, f32, i64)> = Vec::new();
		for slot in self.ai_slots() {
			for handle in slot.states() {
				let snapshot = handle.shared.snapshot();
				if !snapshot.initialized {
					continue;
				}
				let min_distance = offsets
					.iter()
					.map(|offset| (snapshot.position - offset).norm_squared())
					.fold(f32::MAX, f32::min);
				distances.push((slot.clone(), handle, min_distance, snapshot.spawn_protection_ends));
			}
		}
		distances.sort_by(|a, b| b.2.total_cmp(&a.2));

		let radius_squared = self.config.player_radius_squared();
		distances
			.into_iter()
			.filter(|(_, _, distance, protection)| *distance > radius_squared && now > *protection)
			.map(|(slot, handle, _, _)| (slot, handle))
			.collect()
	}

	/// One spawn/despawn balancing tick.
	pub fn update(&self) {
		let started = Instant::now();
		let now = self.clock.now_ms();
		let environment = self.environment();
		let players = self.active_players(now);

		let mut uninitialized: Vec<(Arc<AiSlot>, AiHandle)> = Vec::new();
		let mut initialized_count = 0;
		for slot in self.ai_slots() {
			slot.remove_unsafe_states();
			for handle in slot.states() {
				if handle.shared.snapshot().initialized {
					initialized_count += 1;
				} else {
					uninitialized.push((slot.clone(), handle));
				}
			}
		}
		self.metrics.set_ai_state_count(initialized_count);

		if now < self.session_start.load(Ordering::SeqCst) {
			self.metrics.record_update(started.elapsed());
			return;
		}

		uninitialized.extend(self.respawn_candidates(now, &players));

		let mut clusters = build_clusters(
			&players,
			self.config.player_cluster_radius_meters,
			self.config.ai_per_player_target_count as f32,
			self.config.cluster_diminishing_factor
		);

		// SPAWN

		let mut rng = self.rng.lock();
		let mut navigation = self.navigation.lock();
		let max_attempts = uninitialized.len() * 2;
		let mut attempts = 0;
		while !uninitialized.is_empty() && !clusters.is_empty() && attempts < max_attempts {
			attempts += 1;

			let Some(index) = pick_weighted(&clusters, &mut rng) else {
				break;
			};
			let members = &clusters[index].players;
			let anchor = members[rng.gen_range(0..members.len())];

			let Some(spawn) = self.spawn_point(&anchor, &mut navigation, &mut rng) else {
				continue;
			};
			if navigation.next(spawn).is_none() {
				continue;
			}

			let previous = self.find_closest_ai(spawn, false, &mut navigation);
			let next = self.find_closest_ai(spawn, true, &mut navigation);
			let chosen = uninitialized.iter().position(|(slot, handle)| {
				slot.can_spawn_state(spawn, &handle.shared)
					&& handle.state.lock().can_spawn(spawn, previous.as_ref(), next.as_ref())
			});
			let Some(chosen) = chosen else {
				continue;
			};

			let (slot, handle) = uninitialized.remove(chosen);
			if !handle.state.lock().teleport(spawn, now, &environment) {
				continue;
			}
			trace!(session_id = slot.session_id, ai = handle.shared.id, point = spawn, "spawned AI");

			clusters[index].remaining_budget -= 1.0;
			if clusters[index].remaining_budget <= 0.0 {
				clusters.remove(index);
			}
		}

		self.metrics.record_update(started.elapsed());
	}

	/// Random point ahead of or behind `anchor` in its direction of travel,
	/// pushed further along until it is clear of AI and players.
	fn spawn_point(&self, anchor: &PlayerCar, navigation: &mut JunctionEvaluator, rng: &mut SmallRng) -> Option<u32> {
		let (point, distance_squared) = self.network.world_to_spline(&anchor.status.position)?;
		link(self.network.point(point).next)?;
		if distance_squared > self.config.max_player_distance_to_ai_spline_meters.powi(2) {
			return None;
		}

		let heading = |id: u32| {
			if self.network.forward(id).dot(&anchor.status.velocity) > 0.0 { 1.0 } else { -1.0 }
		};
		let mut direction = heading(point);
		let min = self.config.min_spawn_distance_meters;
		let max = self.config.max_spawn_distance_meters.max(min + 1.0);
		let distance = rng.gen_range(min..max);

		let mut spawn = navigation.traverse(point, distance * direction)?;
		spawn = self.network.random_lane(spawn, rng);
		if link(self.network.point(spawn).next).is_some() {
			direction = heading(spawn);
		}

		let max_steps = self.network.meters_to_points(self.config.max_spawn_distance_meters).max(1);
		let mut steps = 0;
		while !self.is_position_safe(spawn) {
			steps += 1;
			if steps > max_steps {
				return None;
			}
			spawn = if direction > 0.0 {
				navigation.try_next(spawn, UNSAFE_SPAWN_STEP_POINTS, true)?
			} else {
				navigation.try_previous(spawn, UNSAFE_SPAWN_STEP_POINTS)?
			};
		}
		Some(self.network.random_lane(spawn, rng))
	}

	fn is_position_safe(&self, point: u32) -> bool {
		if !self.ai_slots().all(|slot| slot.is_position_safe(point)) {
			return false;
		}
		let position = self.network.point(point).position;
		let safety_squared = self.config.spawn_safety_distance_to_player_meters.powi(2);
		self.players
			.all()
			.iter()
			.filter(|player| player.has_sent_first_update)
			.all(|player| (player.status.position - position).norm_squared() >= safety_squared)
	}

	/// First registered AI within a short walk ahead of or behind `point`.
	fn find_closest_ai(&self, point: u32, forward: bool, navigation: &mut JunctionEvaluator) -> Option<AiRef> {
		let mut travelled = 0.0;
		let mut current = point;
		while travelled < NEIGHBOUR_SEARCH_METERS {
			travelled += self.network.point(current).length;
			current = if forward { navigation.next(current) } else { navigation.previous(current) }?;
			if let Some(slowest) = self.network.slowest.get(current) {
				return Some(slowest);
			}
		}
		None
	}

	// OBSTACLE DETECTION

	/// Obstacle scan and motion update for every AI instance. Returns the
	/// debug packets to deliver when debugging is on.
	pub fn obstacle_detection(&self) -> Vec<(u8, AiDebugPacket)> {
		let started = Instant::now();
		let players = self.players.all();
		let slots: Vec<&Arc<AiSlot>> = self.ai_slots().collect();
		let ai: Vec<AiRef> = slots
			.iter()
			.flat_map(|slot| slot.states())
			.map(|handle| handle.shared)
			.collect();
		let ctx = TickContext {
			now: self.clock.now_ms(),
			players: &players,
			ai: &ai,
			environment: self.environment(),
		};
		for slot in &slots {
			slot.obstacle_detection(&ctx);
		}

		let packets = if self.config.debug { self.debug_packets(&players, &slots) } else { Vec::new() };
		self.metrics.record_obstacle_detection(started.elapsed());
		packets
	}

	/// Per player, the closest instance of every AI slot.
	fn debug_packets(&self, players: &[PlayerCar], slots: &[&Arc<AiSlot>]) -> Vec<(u8, AiDebugPacket)> {
		let mut packets = Vec::new();
		for player in players.iter().filter(|p| p.has_sent_first_update) {
			let entries: Vec<AiDebugEntry> = slots
				.iter()
				.filter_map(|slot| {
					let (handle, _) = slot.closest_state(&player.status.position)?;
					let snapshot = handle.shared.snapshot();
					Some(AiDebugEntry {
						session_id: slot.session_id,
						current_speed: snapshot.current_speed,
						target_speed: snapshot.target_speed,
						max_speed: snapshot.max_speed,
						closest_ai_obstacle: snapshot.closest_ai_obstacle_distance,
					})
				})
				.collect();
			packets.extend(batch(&entries).into_iter().map(|packet| (player.session_id, packet)));
		}
		packets
	}

	// LOOPS

	/// Runs the update and obstacle loops until `shutdown` flips or its sender
	/// goes away.
	pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
		info!(
			update_ms = self.config.update_interval_ms(),
			obstacle_ms = self.config.obstacle_detection_interval_ms,
			slots = self.slots.len(),
			"traffic loops started"
		);
		tokio::join!(
			self.clone().update_loop(shutdown.clone()),
			self.clone().obstacle_loop(shutdown)
		);
		info!("traffic loops stopped");
	}

	async fn update_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
		let mut ticker = interval(Duration::from_millis(self.config.update_interval_ms()));
		ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
		loop {
			tokio::select! {
				_ = ticker.tick() => {}
				_ = shutdown.changed() => break,
			}
			if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.update())) {
				error!(reason = panic_message(panic.as_ref()), "error in AI update");
			}
		}
	}

	async fn obstacle_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
		let mut ticker = interval(Duration::from_millis(self.config.obstacle_detection_interval_ms.max(1)));
		ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
		loop {
			tokio::select! {
				_ = ticker.tick() => {}
				_ = shutdown.changed() => break,
			}
			let packets = match catch_unwind(AssertUnwindSafe(|| self.obstacle_detection())) {
				Ok(packets) => packets,
				Err(panic) => {
					error!(reason = panic_message(panic.as_ref()), "error in AI obstacle detection");
					continue;
				}
			};
			if let Some(sink) = &self.sink {
				for (recipient, packet) in packets {
					sink.send_ai_debug(recipient, packet).await;
				}
			}
		}
	}
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
	if let Some(message) = payload.downcast_ref::<&str>() {
		message
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message
	} else {
		"unknown panic"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		clock::ManualClock,
		config::SlotConfig,
		network::builder::NetworkBuilder,
	};

	fn coordinator_with(
		slots: Vec<SlotConfig>,
		clock: Arc<ManualClock>,
		tweak: impl FnOnce(&mut TrafficConfig)
	) -> TrafficCoordinator {
		let network = Arc::new(NetworkBuilder::straight_road(1, 3000.0, 5.0, 3.0).unwrap());
		let mut config = TrafficConfig {
			seed: Some(5),
			slots,
			..Default::default()
		};
		tweak(&mut config);
		TrafficCoordinator::new(network, config, clock, None)
	}

	fn coordinator(slots: Vec<SlotConfig>, clock: Arc<ManualClock>) -> TrafficCoordinator {
		coordinator_with(slots, clock, |_| {})
	}

	fn fixed(session_id: u8) -> SlotConfig {
		SlotConfig {
			session_id,
			ai_mode: AiMode::Fixed,
			..Default::default()
		}
	}

	fn moving_player(z: f32) -> CarStatus {
		CarStatus {
			position: Vec3::new(0.0, 0.0, z),
			velocity: Vec3::new(0.0, 0.0, 20.0),
			..Default::default()
		}
	}

	#[test]
	fn overbooking_spreads_the_rest_over_the_first_slots() {
		let clock = Arc::new(ManualClock::new(0));
		let coordinator = coordinator_with(vec![fixed(0), fixed(1), fixed(2)], clock, |config| {
			config.ai_per_player_target_count = 3;
			config.max_ai_target_count = 7;
		});

		coordinator.players.connect(10, 0);
		coordinator.players.connect(11, 0);
		coordinator.players.connect(12, 0);
		coordinator.adjust_overbooking();
		let counts: Vec<usize> = coordinator.slots().iter().map(|s| s.target_overbooking()).collect();
		assert_eq!(counts, vec![3, 2, 2]);
	}

	#[test]
	fn connecting_to_an_auto_slot_takes_it_from_the_ai() {
		let clock = Arc::new(ManualClock::new(0));
		let auto = SlotConfig {
			session_id: 1,
			ai_mode: AiMode::Auto,
			..Default::default()
		};
		let coordinator = coordinator(vec![fixed(0), auto], clock);
		coordinator.player_connected(1);
		assert!(!coordinator.slot(1).unwrap().is_ai_controlled());
		assert!(coordinator.slot(0).unwrap().is_ai_controlled());
		coordinator.player_disconnected(1);
		assert!(coordinator.slot(1).unwrap().is_ai_controlled());
	}

	#[test]
	fn update_spawns_ahead_of_a_player() {
		let clock = Arc::new(ManualClock::new(1_000));
		let coordinator = coordinator(vec![fixed(0)], clock);
		coordinator.player_connected(9);
		coordinator.update_player(9, moving_player(100.0));
		assert_eq!(coordinator.slot(0).unwrap().states().len(), 1);

		coordinator.update();
		let handle = coordinator.slot(0).unwrap().states()[0].clone();
		let snapshot = handle.shared.snapshot();
		assert!(snapshot.initialized);
		assert!(snapshot.position.z > 100.0);
		assert_eq!(coordinator.metrics().update.ticks, 1);
	}

	#[test]
	fn nothing_spawns_before_the_session_starts() {
		let clock = Arc::new(ManualClock::new(1_000));
		let coordinator = coordinator(vec![fixed(0)], clock);
		coordinator.player_connected(9);
		coordinator.update_player(9, moving_player(100.0));
		coordinator.session_changed(5_000);
		coordinator.update();
		assert!(!coordinator.slot(0).unwrap().states()[0].shared.snapshot().initialized);
	}

	#[test]
	fn debug_packets_list_the_closest_instance() {
		let clock = Arc::new(ManualClock::new(1_000));
		let coordinator = coordinator_with(vec![fixed(0)], clock, |config| config.debug = true);
		coordinator.player_connected(9);
		coordinator.update_player(9, moving_player(100.0));
		coordinator.update();

		let packets = coordinator.obstacle_detection();
		assert_eq!(packets.len(), 1);
		assert_eq!(packets[0].0, 9);
		assert_eq!(packets[0].1.session_ids[0], 0);
		assert_eq!(packets[0].1.session_ids[1], 255);
	}

	#[test]
	fn panic_payloads_are_readable() {
		let payload: Box<dyn Any + Send> = Box::new("boom");
		assert_eq!(panic_message(payload.as_ref()), "boom");
		let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
		assert_eq!(panic_message(payload.as_ref()), "bang");
	}
}
